use chrono::{Duration, NaiveDate};
use coopsrs::api::currents_from_json;
use coopsrs::{Bin, ProviderError, Station, StationProvider};
use coopsrs::station::BinInventory;
use polars::prelude::DataFrame;
use serde_json::json;
use std::cell::Cell;
use std::collections::HashMap;

/// In-memory stand-in for the CO-OPS services: hourly records starting at
/// the deployment date, counting every call it answers.
pub struct FakeProvider {
    pub station: Station,
    pub rows_per_bin: HashMap<u32, usize>,
    pub default_rows: usize,
    pub failing_bin: Option<u32>,
    /// bin whose records carry no `b` field
    pub bare_bin: Option<u32>,
    pub station_calls: Cell<usize>,
    pub currents_calls: Cell<usize>,
}

pub fn station_9087079(depths: &[(u32, f64)]) -> Station {
    Station {
        id: "9087079".to_string(),
        name: Some("Green Bay West".to_string()),
        lat: Some(44.5387),
        lon: Some(-88.0048),
        deployed: Some("2020-01-01 00:00:00".to_string()),
        retrieved: Some("2020-01-02 00:00:00".to_string()),
        deployments: json!({"name": "deployment 1", "lat": 0.0, "depth": 20.0}),
        bins: Some(BinInventory {
            real_time_bin: Some(1),
            bins: depths
                .iter()
                .map(|(num, depth)| Bin {
                    num: *num,
                    depth: Some(*depth),
                })
                .collect(),
        }),
        observe_dst: Some(true),
        project: Some("Great Lakes".to_string()),
        project_type: Some("Current Survey".to_string()),
        timezone_offset: json!("-6"),
        units: Some("metric".to_string()),
    }
}

impl FakeProvider {
    pub fn new(station: Station) -> Self {
        Self {
            station,
            rows_per_bin: HashMap::new(),
            default_rows: 24,
            failing_bin: None,
            bare_bin: None,
            station_calls: Cell::new(0),
            currents_calls: Cell::new(0),
        }
    }

    pub fn two_bins() -> Self {
        Self::new(station_9087079(&[(1, 5.0), (2, 15.0)]))
    }
}

impl StationProvider for FakeProvider {
    fn station(&self, station_id: &str) -> Result<Station, ProviderError> {
        self.station_calls.set(self.station_calls.get() + 1);
        if station_id != self.station.id {
            return Err(ProviderError::StationNotFound(station_id.to_owned()));
        }
        Ok(self.station.clone())
    }

    fn currents(
        &self,
        _station_id: &str,
        bin: &Bin,
        begin: NaiveDate,
        _end: NaiveDate,
    ) -> Result<DataFrame, ProviderError> {
        self.currents_calls.set(self.currents_calls.get() + 1);
        if self.failing_bin == Some(bin.num) {
            return Err(ProviderError::ApiError(format!(
                "Bin number {} is invalid",
                bin.num
            )));
        }
        let rows = *self.rows_per_bin.get(&bin.num).unwrap_or(&self.default_rows);
        let start = begin.and_hms_opt(0, 0, 0).unwrap();
        let data: Vec<_> = (0..rows)
            .map(|hour| {
                let t = start + Duration::hours(hour as i64);
                let mut record = json!({
                    "t": t.format("%Y-%m-%d %H:%M").to_string(),
                    "s": format!("{:.2}", bin.num as f64 * 10.0 + hour as f64),
                    "d": format!("{}", (hour * 15) % 360),
                });
                if self.bare_bin != Some(bin.num) {
                    record["b"] = json!(bin.num.to_string());
                }
                record
            })
            .collect();
        currents_from_json(&json!({ "data": data }).to_string())
    }
}
