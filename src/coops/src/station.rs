use chrono::{NaiveDate, Utc};
use linked_hash_map::LinkedHashMap;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Descriptive key/value pairs attached to a source or a dataset.
pub type Metadata = LinkedHashMap<String, Value>;

/// One ADCP depth bin at a currents station.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bin {
    pub num: u32,
    #[serde(default)]
    pub depth: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BinInventory {
    #[serde(default)]
    pub real_time_bin: Option<u32>,
    #[serde(default)]
    pub bins: Vec<Bin>,
}

/// A CO-OPS station as described by the metadata API.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Station {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(rename = "lng", default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub deployed: Option<String>,
    #[serde(default)]
    pub retrieved: Option<String>,
    #[serde(default)]
    pub deployments: Value,
    #[serde(default)]
    pub bins: Option<BinInventory>,
    #[serde(default)]
    pub observe_dst: Option<bool>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub timezone_offset: Value,
    #[serde(default)]
    pub units: Option<String>,
}

#[derive(Error, Debug)]
pub enum StationError {
    #[error("station {0} has no deployment date")]
    MissingDeploymentDate(String),
    #[error("could not parse date '{value}': {reason}")]
    DateParseError { value: String, reason: String },
    #[error("station {station} was retrieved ({end}) before it was deployed ({begin})")]
    InvertedDeploymentWindow {
        station: String,
        begin: NaiveDate,
        end: NaiveDate,
    },
}

fn parse_day(value: &str) -> Result<NaiveDate, StationError> {
    dateparser::parse_with_timezone(value, &Utc)
        .map(|datetime| datetime.date_naive())
        .map_err(|e| StationError::DateParseError {
            value: value.to_owned(),
            reason: e.to_string(),
        })
}

fn optional<T: Clone + Into<Value>>(value: &Option<T>) -> Value {
    value.clone().map_or(Value::Null, Into::into)
}

impl Station {
    pub fn bins(&self) -> &[Bin] {
        self.bins
            .as_ref()
            .map(|inventory| inventory.bins.as_slice())
            .unwrap_or_default()
    }

    /// Deployment start and retrieval end, truncated to days.
    ///
    /// A station without a retrieval date is still in the water, so the
    /// window runs through today.
    pub fn deployment_window(&self) -> Result<(NaiveDate, NaiveDate), StationError> {
        let deployed = self
            .deployed
            .as_deref()
            .ok_or_else(|| StationError::MissingDeploymentDate(self.id.clone()))?;
        let begin = parse_day(deployed)?;
        let end = match self.retrieved.as_deref() {
            Some(retrieved) if !retrieved.trim().is_empty() => parse_day(retrieved)?,
            _ => Utc::now().date_naive(),
        };
        if begin > end {
            return Err(StationError::InvertedDeploymentWindow {
                station: self.id.clone(),
                begin,
                end,
            });
        }
        Ok((begin, end))
    }

    pub fn lat_lon(&self) -> Metadata {
        let mut lat_lon = Metadata::new();
        lat_lon.insert("lat".to_string(), optional(&self.lat));
        lat_lon.insert("lon".to_string(), optional(&self.lon));
        lat_lon
    }

    pub fn dataset_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("deployed".to_string(), optional(&self.deployed));
        metadata.insert("retrieved".to_string(), optional(&self.retrieved));
        match &self.deployments {
            Value::Object(entries) => {
                for (key, value) in entries.iter().filter(|(key, _)| key.as_str() != "self") {
                    metadata.insert(key.clone(), value.clone());
                }
            }
            other => {
                metadata.insert("deployments".to_string(), other.clone());
            }
        }
        metadata.extend(self.lat_lon());
        metadata.insert("name".to_string(), optional(&self.name));
        metadata.insert("observe_dst".to_string(), optional(&self.observe_dst));
        metadata.insert("project".to_string(), optional(&self.project));
        metadata.insert("project_type".to_string(), optional(&self.project_type));
        metadata.insert("timezone_offset".to_string(), self.timezone_offset.clone());
        metadata.insert("units".to_string(), optional(&self.units));
        metadata
    }
}
