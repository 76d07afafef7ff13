use crate::api::{stack_frames, CoopsClient, StationProvider};
use crate::config::CoopsConfig;
use crate::dataset::DEPTH_DIM;
use crate::source::{Container, DataSource, Schema, SourceError};
use crate::station::{Metadata, Station};
use log::{debug, info};
use polars::prelude::*;

/// Every current record of one station, one row per `(date_time, depth)`
/// observation, with the bin depth in a `depth` column.
pub struct TabularStationSource<P = CoopsClient> {
    station_id: String,
    metadata: Metadata,
    provider: P,
    station: Option<Station>,
    dataset_metadata: Option<Metadata>,
    dataframe: Option<DataFrame>,
}

impl TabularStationSource<CoopsClient> {
    /// Source talking to the CO-OPS web services, configured from
    /// `coops.toml` and `COOPS_*` variables. Nothing is fetched yet.
    pub fn new(station_id: impl Into<String>, metadata: Metadata) -> Result<Self, SourceError> {
        let config = CoopsConfig::load(None)?;
        let provider = CoopsClient::from_config(config)?;
        Ok(Self::with_provider(station_id, metadata, provider))
    }
}

impl TryFrom<String> for TabularStationSource<CoopsClient> {
    type Error = SourceError;
    fn try_from(station_id: String) -> Result<Self, Self::Error> {
        Self::new(station_id, Metadata::new())
    }
}

fn cached_station<'a, P: StationProvider>(
    cache: &'a mut Option<Station>,
    provider: &P,
    station_id: &str,
) -> Result<&'a Station, SourceError> {
    let station = match cache.take() {
        Some(station) => station,
        None => provider.station(station_id)?,
    };
    Ok(cache.insert(station))
}

impl<P: StationProvider> TabularStationSource<P> {
    pub fn with_provider(station_id: impl Into<String>, metadata: Metadata, provider: P) -> Self {
        Self {
            station_id: station_id.into(),
            metadata,
            provider,
            station: None,
            dataset_metadata: None,
            dataframe: None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn is_loaded(&self) -> bool {
        self.dataframe.is_some()
    }

    pub fn station(&mut self) -> Result<&Station, SourceError> {
        cached_station(&mut self.station, &self.provider, &self.station_id)
    }

    pub fn dataset_metadata(&mut self) -> Result<&Metadata, SourceError> {
        let metadata = match self.dataset_metadata.take() {
            Some(metadata) => metadata,
            None => self.station()?.dataset_metadata(),
        };
        Ok(self.dataset_metadata.insert(metadata))
    }

    fn load(&mut self) -> Result<DataFrame, SourceError> {
        let station = cached_station(&mut self.station, &self.provider, &self.station_id)?;
        let (begin, end) = station.deployment_window()?;
        let bins = station.bins();
        if bins.is_empty() {
            return Err(SourceError::NoBins(self.station_id.clone()));
        }
        let mut frames = Vec::with_capacity(bins.len());
        for bin in bins {
            debug!(
                "station {}: fetching bin {} ({:?} m) {} to {}",
                self.station_id, bin.num, bin.depth, begin, end
            );
            let mut frame = self.provider.currents(&self.station_id, bin, begin, end)?;
            let depth = Series::new(DEPTH_DIM, vec![bin.depth; frame.height()]);
            frame.with_column(depth)?;
            frames.push(frame);
        }
        let dataframe = stack_frames(&frames)?;
        info!(
            "station {}: loaded {} rows from {} bins",
            self.station_id,
            dataframe.height(),
            bins.len()
        );
        Ok(dataframe)
    }
}

impl<P: StationProvider> DataSource for TabularStationSource<P> {
    const NAME: &'static str = "coops-dataframe";
    const VERSION: &'static str = "0.0.1";
    const CONTAINER: Container = Container::Dataframe;
    const PARTITION_ACCESS: bool = true;

    type Output = DataFrame;

    fn station_id(&self) -> &str {
        &self.station_id
    }

    fn schema(&mut self) -> Result<Schema, SourceError> {
        let dataframe = self.read()?;
        let dtype = dataframe
            .get_columns()
            .iter()
            .map(|series| (series.name().to_string(), series.dtype().clone()))
            .collect();
        let (height, width) = dataframe.shape();
        Ok(Schema {
            dtype,
            shape: vec![height, width],
            npartitions: 1,
            extra_metadata: self.dataset_metadata()?.clone(),
        })
    }

    fn read(&mut self) -> Result<&DataFrame, SourceError> {
        let dataframe = match self.dataframe.take() {
            Some(dataframe) => dataframe,
            None => self.load()?,
        };
        Ok(self.dataframe.insert(dataframe))
    }

    fn metadata(&mut self) -> Result<Metadata, SourceError> {
        let mut metadata = self.metadata.clone();
        metadata.extend(self.dataset_metadata()?.clone());
        Ok(metadata)
    }

    fn close(&mut self) {
        self.dataframe = None;
    }
}
