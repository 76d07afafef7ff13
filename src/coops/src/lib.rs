pub mod api;
pub mod config;
pub mod dataframe;
pub mod dataset;
pub mod source;
pub mod station;
pub mod xarray;

pub use api::{CoopsClient, ProviderError, StationProvider};
pub use config::CoopsConfig;
pub use dataframe::TabularStationSource;
pub use dataset::StationDataset;
pub use source::{Container, DataSource, Schema, SourceError};
pub use station::{Bin, Metadata, Station};
pub use xarray::ArrayStationSource;
