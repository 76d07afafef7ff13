use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

static DEFAULT_API_URL: &'static str = "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter";
static DEFAULT_MDAPI_URL: &'static str = "https://api.tidesandcurrents.noaa.gov/mdapi/prod/webapi/";
static DEFAULT_CONFIG_FILE: &'static str = "coops.toml";
static ENV_PREFIX: &'static str = "COOPS_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Metric,
    English,
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::Metric => write!(f, "metric"),
            Units::English => write!(f, "english"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeZone {
    Gmt,
    Lst,
    LstLdt,
}

impl fmt::Display for TimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeZone::Gmt => write!(f, "gmt"),
            TimeZone::Lst => write!(f, "lst"),
            TimeZone::LstLdt => write!(f, "lst_ldt"),
        }
    }
}

/// Settings for talking to the CO-OPS data and metadata APIs.
///
/// Layered as: built-in defaults, then a TOML file, then `COOPS_*`
/// environment variables (e.g. `COOPS_UNITS=english`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoopsConfig {
    pub api_url: String,
    pub mdapi_url: String,
    pub application: String,
    pub units: Units,
    pub time_zone: TimeZone,
    pub interval: Option<String>,
    /// Widest date range requested in a single datagetter call.
    pub max_block_days: i64,
    pub timeout_secs: u64,
}

impl Default for CoopsConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            mdapi_url: DEFAULT_MDAPI_URL.to_string(),
            application: env!("CARGO_PKG_NAME").to_string(),
            units: Units::Metric,
            time_zone: TimeZone::Gmt,
            interval: None,
            max_block_days: 31,
            timeout_secs: 60,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    FigmentError(#[from] Box<figment::Error>),
    #[error("max_block_days must be > 0, got {0}")]
    InvalidBlockSize(i64),
    #[error("timeout_secs must be > 0")]
    InvalidTimeout,
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::FigmentError(Box::new(e))
    }
}

impl CoopsConfig {
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(CoopsConfig::default()));
        let figment = match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        };
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: CoopsConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_block_days <= 0 {
            return Err(ConfigError::InvalidBlockSize(self.max_block_days));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}
