//! Lag, rolling and calendar features.
//!
//! Every derived value at grid position `t` is computed from the slice
//! `values[..t]`, i.e. strictly earlier hours of the same station. The
//! rolling statistics therefore see the lag-1-shifted series, and no
//! feature can observe the row's own value or anything after it.

use crate::logging::{self, Stage};
use crate::model::{FeatureRow, FeatureTable, MergedSeries, Pollutant, StationMetadata};
use chrono::{Datelike, Timelike};
use rayon::prelude::*;

/// Lag offsets in hours.
pub const LAGS: [usize; 5] = [1, 2, 3, 24, 48];

/// Rolling window lengths in hours.
pub const WINDOWS: [usize; 3] = [3, 6, 24];

/// Names of the derived columns, in `FeatureRow::derived` order.
pub fn derived_columns() -> Vec<String> {
    let mut cols = Vec::new();
    for pollutant in Pollutant::ALL {
        let name = pollutant.column();
        for k in LAGS {
            cols.push(format!("{}_lag_{}", name, k));
        }
        for w in WINDOWS {
            cols.push(format!("{}_roll_mean_{}", name, w));
            cols.push(format!("{}_roll_std_{}", name, w));
        }
    }
    cols
}

// ---------------------------------------------------------------------------
// Past-only statistics
// ---------------------------------------------------------------------------

/// Value `k` steps before the end of `past`.
pub fn lag(past: &[Option<f64>], k: usize) -> Option<f64> {
    past.len().checked_sub(k).and_then(|i| past[i])
}

/// The last `w` values of `past`, if there are `w` and all are defined.
fn window(past: &[Option<f64>], w: usize) -> Option<Vec<f64>> {
    let start = past.len().checked_sub(w)?;
    past[start..].iter().copied().collect()
}

/// Mean of the last `w` values of `past`.
pub fn rolling_mean(past: &[Option<f64>], w: usize) -> Option<f64> {
    let win = window(past, w)?;
    if win.is_empty() {
        return None;
    }
    Some(win.iter().sum::<f64>() / win.len() as f64)
}

/// Sample standard deviation of the last `w` values of `past`.
pub fn rolling_std(past: &[Option<f64>], w: usize) -> Option<f64> {
    let win = window(past, w)?;
    if win.len() < 2 {
        return None;
    }
    let mean = win.iter().sum::<f64>() / win.len() as f64;
    let ss: f64 = win.iter().map(|x| (x - mean).powi(2)).sum();
    Some((ss / (win.len() - 1) as f64).sqrt())
}

fn derived_at(past10: &[Option<f64>], past25: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(2 * (LAGS.len() + 2 * WINDOWS.len()));
    for past in [past10, past25] {
        for k in LAGS {
            out.push(lag(past, k));
        }
        for w in WINDOWS {
            out.push(rolling_mean(past, w));
            out.push(rolling_std(past, w));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Table construction
// ---------------------------------------------------------------------------

/// Feature rows for one station, in timestamp order.
pub fn station_features(series: &MergedSeries) -> Vec<FeatureRow> {
    (0..series.len())
        .map(|t| {
            let timestamp = series.timestamp_at(t);
            FeatureRow {
                station: series.station.clone(),
                timestamp,
                pm10: series.pm10[t],
                pm25: series.pm25[t],
                hour: timestamp.hour(),
                day_of_week: timestamp.weekday().num_days_from_monday(),
                month: timestamp.month(),
                derived: derived_at(&series.pm10[..t], &series.pm25[..t]),
            }
        })
        .collect()
}

/// Builds the feature table for all merged stations.
pub fn build_features(merged: &[MergedSeries]) -> FeatureTable {
    let per_station: Vec<Vec<FeatureRow>> = merged.par_iter().map(station_features).collect();

    let mut metadata = StationMetadata::new();
    for series in merged {
        if let Some(meta) = &series.meta {
            metadata.insert(series.station.clone(), meta.clone());
        }
    }

    let mut rows = Vec::with_capacity(per_station.iter().map(|r| r.len()).sum());
    let mut station_ranges = Vec::with_capacity(per_station.len());
    for (series, station_rows) in merged.iter().zip(per_station) {
        let begin = rows.len();
        rows.extend(station_rows);
        station_ranges.push((series.station.clone(), begin..rows.len()));
    }

    logging::info(
        Stage::Features,
        None,
        &format!(
            "{} feature rows across {} stations",
            rows.len(),
            station_ranges.len()
        ),
    );

    FeatureTable {
        derived_columns: derived_columns(),
        rows,
        station_ranges,
        metadata,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
