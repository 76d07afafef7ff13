use crate::api::{CoopsClient, StationProvider};
use crate::dataframe::TabularStationSource;
use crate::dataset::StationDataset;
use crate::source::{Container, DataSource, Schema, SourceError};
use crate::station::Metadata;
use polars::prelude::DataType;

/// Gridded view of a station: wraps one [`TabularStationSource`] and
/// pivots its table onto `(date_time, depth)`.
pub struct ArrayStationSource<P = CoopsClient> {
    source: TabularStationSource<P>,
    dataset: Option<StationDataset>,
}

impl ArrayStationSource<CoopsClient> {
    pub fn new(station_id: impl Into<String>, metadata: Metadata) -> Result<Self, SourceError> {
        Ok(Self::from_source(TabularStationSource::new(
            station_id, metadata,
        )?))
    }
}

impl TryFrom<String> for ArrayStationSource<CoopsClient> {
    type Error = SourceError;
    fn try_from(station_id: String) -> Result<Self, Self::Error> {
        Self::new(station_id, Metadata::new())
    }
}

impl<P: StationProvider> ArrayStationSource<P> {
    pub fn with_provider(station_id: impl Into<String>, metadata: Metadata, provider: P) -> Self {
        Self::from_source(TabularStationSource::with_provider(
            station_id, metadata, provider,
        ))
    }

    pub fn from_source(source: TabularStationSource<P>) -> Self {
        Self {
            source,
            dataset: None,
        }
    }

    pub fn tabular(&mut self) -> &mut TabularStationSource<P> {
        &mut self.source
    }

    pub fn provider(&self) -> &P {
        self.source.provider()
    }
}

impl<P: StationProvider> DataSource for ArrayStationSource<P> {
    const NAME: &'static str = "coops-xarray";
    const VERSION: &'static str = "0.0.1";
    const CONTAINER: Container = Container::Xarray;
    const PARTITION_ACCESS: bool = true;

    type Output = StationDataset;

    fn station_id(&self) -> &str {
        self.source.station_id()
    }

    fn schema(&mut self) -> Result<Schema, SourceError> {
        let dataset = self.read()?;
        let dtype = dataset
            .variables()
            .map(|name| (name.to_string(), DataType::Float64))
            .collect();
        let shape = dataset.dims().iter().map(|(_, size)| *size).collect();
        Ok(Schema {
            dtype,
            shape,
            npartitions: 1,
            extra_metadata: self.source.dataset_metadata()?.clone(),
        })
    }

    fn read(&mut self) -> Result<&StationDataset, SourceError> {
        let dataset = match self.dataset.take() {
            Some(dataset) => dataset,
            None => StationDataset::from_measurements(self.source.read()?)?,
        };
        Ok(self.dataset.insert(dataset))
    }

    fn metadata(&mut self) -> Result<Metadata, SourceError> {
        self.source.metadata()
    }

    /// Drops the grid and the wrapped table, so the next read refetches.
    fn close(&mut self) {
        self.dataset = None;
        self.source.close();
    }
}
