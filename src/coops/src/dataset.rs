use chrono::{DateTime, NaiveDateTime};
use log::info;
use ndarray::Array2;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub static TIME_DIM: &'static str = "date_time";
pub static DEPTH_DIM: &'static str = "depth";

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

/// Current measurements on a `(date_time, depth)` grid.
///
/// Every data variable is an `Array2<f64>` of shape `(time, depth)`; a
/// combination that was never observed holds NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct StationDataset {
    time: Vec<NaiveDateTime>,
    depth: Vec<f64>,
    data_vars: BTreeMap<String, Array2<f64>>,
}

fn position_of_depth(depths: &[f64], depth: f64) -> Option<usize> {
    depths.binary_search_by(|probe| probe.total_cmp(&depth)).ok()
}

fn float_values(frame: &DataFrame, name: &str) -> Result<Vec<f64>, DatasetError> {
    let series = frame.column(name)?.cast(&DataType::Float64)?;
    let values = series
        .f64()?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

fn epoch_values(frame: &DataFrame) -> Result<(Vec<i64>, TimeUnit), DatasetError> {
    let column = frame.column(TIME_DIM)?;
    let unit = match column.dtype() {
        DataType::Datetime(unit, _) => *unit,
        _ => TimeUnit::Milliseconds,
    };
    let series = column.cast(&DataType::Int64)?;
    let values = series.i64()?.into_iter().flatten().collect();
    Ok((values, unit))
}

fn to_datetime(value: i64, unit: TimeUnit) -> Result<NaiveDateTime, DatasetError> {
    let datetime = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    };
    datetime
        .map(|datetime| datetime.naive_utc())
        .ok_or(DatasetError::TimestampOutOfRange(value))
}

impl StationDataset {
    /// Pivots a long measurement table onto its `(date_time, depth)`
    /// coordinates.
    ///
    /// Numeric columns other than the two index columns become data
    /// variables; anything else is dropped. Rows repeating a coordinate
    /// pair are averaged and rows with a null coordinate are ignored.
    pub fn from_measurements(measurements: &DataFrame) -> Result<Self, DatasetError> {
        let variables: Vec<String> = measurements
            .get_columns()
            .iter()
            .filter(|series| series.name() != TIME_DIM && series.name() != DEPTH_DIM)
            .filter(|series| series.dtype().is_numeric())
            .map(|series| series.name().to_string())
            .collect();
        let aggregations: Vec<Expr> = variables
            .iter()
            .map(|name| col(name).cast(DataType::Float64).mean())
            .collect();
        let grouped = measurements
            .clone()
            .lazy()
            .filter(col(TIME_DIM).is_not_null().and(col(DEPTH_DIM).is_not_null()))
            .group_by([col(TIME_DIM), col(DEPTH_DIM)])
            .agg(aggregations)
            .collect()?;

        let (row_times, unit) = epoch_values(&grouped)?;
        let row_depths = float_values(&grouped, DEPTH_DIM)?;

        let mut times = row_times.clone();
        times.sort_unstable();
        times.dedup();
        let mut depth = row_depths.clone();
        depth.sort_by(f64::total_cmp);
        depth.dedup_by(|a, b| a.total_cmp(b).is_eq());

        let shape = (times.len(), depth.len());
        let mut data_vars = BTreeMap::new();
        for name in &variables {
            let values = float_values(&grouped, name)?;
            let mut grid = Array2::from_elem(shape, f64::NAN);
            for ((epoch, row_depth), value) in row_times.iter().zip(&row_depths).zip(values) {
                let i = times.binary_search(epoch);
                let j = position_of_depth(&depth, *row_depth);
                if let (Ok(i), Some(j)) = (i, j) {
                    grid[[i, j]] = value;
                }
            }
            data_vars.insert(name.clone(), grid);
        }

        let time = times
            .into_iter()
            .map(|value| to_datetime(value, unit))
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "pivoted {} rows onto {} times x {} depths",
            measurements.height(),
            time.len(),
            depth.len()
        );
        Ok(Self {
            time,
            depth,
            data_vars,
        })
    }

    pub fn time(&self) -> &[NaiveDateTime] {
        &self.time
    }

    pub fn depth(&self) -> &[f64] {
        &self.depth
    }

    pub fn dims(&self) -> [(&'static str, usize); 2] {
        [(TIME_DIM, self.time.len()), (DEPTH_DIM, self.depth.len())]
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.data_vars.keys().map(String::as_str)
    }

    pub fn variable(&self, name: &str) -> Option<&Array2<f64>> {
        self.data_vars.get(name)
    }

    /// Label-based lookup of one cell; `None` for an unknown coordinate or
    /// an empty cell.
    pub fn value(&self, name: &str, time: NaiveDateTime, depth: f64) -> Option<f64> {
        let grid = self.data_vars.get(name)?;
        let i = self.time.binary_search(&time).ok()?;
        let j = position_of_depth(&self.depth, depth)?;
        let value = grid[[i, j]];
        (!value.is_nan()).then_some(value)
    }
}

impl fmt::Display for StationDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<StationDataset>")?;
        writeln!(
            f,
            "Dimensions:  ({}: {}, {}: {})",
            TIME_DIM,
            self.time.len(),
            DEPTH_DIM,
            self.depth.len()
        )?;
        writeln!(f, "Coordinates:")?;
        match (self.time.first(), self.time.last()) {
            (Some(first), Some(last)) => {
                writeln!(f, "  * {:<10} ({}) {} .. {}", TIME_DIM, TIME_DIM, first, last)?
            }
            _ => writeln!(f, "  * {:<10} ({})", TIME_DIM, TIME_DIM)?,
        }
        writeln!(f, "  * {:<10} ({}) {:?}", DEPTH_DIM, DEPTH_DIM, self.depth)?;
        writeln!(f, "Data variables:")?;
        for name in self.data_vars.keys() {
            writeln!(f, "    {:<10} ({}, {}) float64", name, TIME_DIM, DEPTH_DIM)?;
        }
        Ok(())
    }
}
