use crate::api::ProviderError;
use crate::config::ConfigError;
use crate::dataset::DatasetError;
use crate::station::{Metadata, StationError};
use polars::prelude::{DataType, PolarsError};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Dataframe,
    Xarray,
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::Dataframe => write!(f, "dataframe"),
            Container::Xarray => write!(f, "xarray"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    ProviderError(#[from] ProviderError),

    #[error(transparent)]
    StationError(#[from] StationError),

    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),

    #[error(transparent)]
    DatasetError(#[from] DatasetError),

    #[error(transparent)]
    ConfigError(#[from] ConfigError),

    #[error("station {0} reports no current bins")]
    NoBins(String),

    #[error("partition {index} out of range, source has {npartitions}")]
    PartitionOutOfRange { index: usize, npartitions: usize },
}

/// What a source will produce, known once it has been loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub dtype: Vec<(String, DataType)>,
    pub shape: Vec<usize>,
    pub npartitions: usize,
    pub extra_metadata: Metadata,
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape: Vec<String> = self.shape.iter().map(ToString::to_string).collect();
        writeln!(f, "shape: ({})", shape.join(", "))?;
        writeln!(f, "npartitions: {}", self.npartitions)?;
        writeln!(f, "dtype:")?;
        for (name, dtype) in &self.dtype {
            writeln!(f, "  {}: {}", name, dtype)?;
        }
        writeln!(f, "metadata:")?;
        for (key, value) in &self.extra_metadata {
            writeln!(f, "  {}: {}", key, value)?;
        }
        Ok(())
    }
}

/// The catalog plugin contract: a named, versioned producer of one
/// container that is loaded lazily and can be closed to drop what it built.
pub trait DataSource {
    const NAME: &'static str;
    const VERSION: &'static str;
    const CONTAINER: Container;
    const PARTITION_ACCESS: bool;

    type Output;

    fn station_id(&self) -> &str;

    fn schema(&mut self) -> Result<Schema, SourceError>;

    fn read(&mut self) -> Result<&Self::Output, SourceError>;

    fn read_partition(&mut self, index: usize) -> Result<&Self::Output, SourceError> {
        let npartitions = self.schema()?.npartitions;
        if index >= npartitions {
            return Err(SourceError::PartitionOutOfRange { index, npartitions });
        }
        self.read()
    }

    /// Caller-supplied metadata overlaid with what the station reports.
    fn metadata(&mut self) -> Result<Metadata, SourceError>;

    fn close(&mut self);
}

/// Registered plugin names and the container each produces.
pub fn plugins() -> [(&'static str, Container); 2] {
    use crate::dataframe::TabularStationSource;
    use crate::xarray::ArrayStationSource;
    [
        (
            <TabularStationSource as DataSource>::NAME,
            <TabularStationSource as DataSource>::CONTAINER,
        ),
        (
            <ArrayStationSource as DataSource>::NAME,
            <ArrayStationSource as DataSource>::CONTAINER,
        ),
    ]
}
