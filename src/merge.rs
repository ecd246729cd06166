//! Multi-pollutant merge.
//!
//! Inner-joins the PM10 and PM2.5 normalized series on (station, timestamp)
//! and left-joins each station's static metadata. Because both inputs are
//! complete hourly grids, the join per station is the overlap of the two
//! grids, which is itself a complete grid.

use crate::logging::{self, Stage};
use crate::model::{MergedSeries, StationMetadata, StationSeries};
use crate::normalize::NormalizedTable;
use std::collections::BTreeMap;

/// Overlap of two station series, `None` when they share no timestamp.
pub fn join_station(
    pm10: &StationSeries,
    pm25: &StationSeries,
    metadata: &StationMetadata,
) -> Option<MergedSeries> {
    let start = pm10.start.max(pm25.start);
    let end = pm10.end()?.min(pm25.end()?);
    if end < start {
        return None;
    }
    let a = pm10.offset_of(start)?;
    let b = pm25.offset_of(start)?;
    let len = (end - start).num_hours() as usize + 1;

    Some(MergedSeries {
        station: pm10.station.clone(),
        start,
        pm10: pm10.values[a..a + len].to_vec(),
        pm25: pm25.values[b..b + len].to_vec(),
        meta: metadata.get(&pm10.station).cloned(),
    })
}

/// Joins both pollutants for every station present in both tables, in
/// station order.
pub fn merge_pollutants(
    pm10: &NormalizedTable,
    pm25: &NormalizedTable,
    metadata: &StationMetadata,
) -> Vec<MergedSeries> {
    let pm25_by_station: BTreeMap<&str, &StationSeries> = pm25
        .series
        .iter()
        .map(|s| (s.station.as_str(), s))
        .collect();

    let mut merged: Vec<MergedSeries> = pm10
        .series
        .iter()
        .filter_map(|s10| {
            let s25 = pm25_by_station.get(s10.station.as_str())?;
            let joined = join_station(s10, s25, metadata);
            if joined.is_none() {
                logging::debug(
                    Stage::Merge,
                    Some(&s10.station),
                    "PM10 and PM2.5 grids do not overlap; station dropped",
                );
            }
            joined
        })
        .collect();
    merged.sort_by(|a, b| a.station.cmp(&b.station));

    let rows: usize = merged.iter().map(|m| m.len()).sum();
    logging::info(
        Stage::Merge,
        None,
        &format!(
            "{} stations merged ({} PM10, {} PM2.5), {} rows",
            merged.len(),
            pm10.series.len(),
            pm25.series.len(),
            rows
        ),
    );
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
