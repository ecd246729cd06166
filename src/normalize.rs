//! Station time-grid normalization.
//!
//! Each station's long readings are regularized independently:
//!
//! 1. duplicate timestamps collapse to the mean of their defined values;
//! 2. the series is laid on a complete hourly grid from its first to its last
//!    timestamp, keyed by hour offset from the first;
//! 3. internal gaps are interpolated linearly in time, at most
//!    `interpolation_limit` hours past the last known value per gap;
//! 4. anything still missing is forward-filled, then backward-filled;
//! 5. values are clamped into the station's own lower/upper quantiles,
//!    computed on the filled series.
//!
//! Stations share nothing, so they are processed on the rayon pool and
//! collected back in station order.

use crate::config::NormalizeConfig;
use crate::logging::{self, Stage, StationCondition, classify_station};
use crate::model::{LongTable, Pollutant, StationSeries};
use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Repair accounting
// ---------------------------------------------------------------------------

/// What normalization did to one station's series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairSummary {
    pub station: String,
    pub observed_rows: usize,
    pub duplicates_collapsed: usize,
    pub grid_len: usize,
    pub interpolated: usize,
    pub filled: usize,
    pub clipped: usize,
    /// Clamp bounds, `None` when the series has no defined value.
    pub clip_bounds: Option<(f64, f64)>,
    pub condition: StationCondition,
}

/// Normalized series for one pollutant, one entry per station in station order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub pollutant: Pollutant,
    pub series: Vec<StationSeries>,
    pub repairs: Vec<RepairSummary>,
}

impl NormalizedTable {
    pub fn grid_rows(&self) -> usize {
        self.series.iter().map(|s| s.len()).sum()
    }

    pub fn station(&self, name: &str) -> Option<&StationSeries> {
        self.series.iter().find(|s| s.station == name)
    }
}

// ---------------------------------------------------------------------------
// Array scans
// ---------------------------------------------------------------------------

/// Linearly interpolates internal gaps, filling at most `limit` positions
/// after the last known value of each gap. Returns the number of filled
/// positions. Leading and trailing gaps are left untouched.
pub fn interpolate_gaps(values: &mut [Option<f64>], limit: usize) -> usize {
    let mut filled = 0;
    let mut last_known: Option<usize> = None;

    for i in 0..values.len() {
        let Some(right) = values[i] else {
            continue;
        };
        if let Some(p) = last_known {
            if i - p > 1 {
                if let Some(left) = values[p] {
                    let span = (i - p) as f64;
                    let stop = (p + limit).min(i - 1);
                    for j in (p + 1)..=stop {
                        let frac = (j - p) as f64 / span;
                        values[j] = Some(left + (right - left) * frac);
                        filled += 1;
                    }
                }
            }
        }
        last_known = Some(i);
    }
    filled
}

/// Forward-fills then backward-fills remaining gaps. Returns the number of
/// filled positions; an all-missing series stays all-missing.
pub fn fill_forward_backward(values: &mut [Option<f64>]) -> usize {
    let mut filled = 0;

    let mut carry = None;
    for v in values.iter_mut() {
        if let Some(x) = *v {
            carry = Some(x);
        } else if carry.is_some() {
            *v = carry;
            filled += 1;
        }
    }

    let mut carry = None;
    for v in values.iter_mut().rev() {
        if let Some(x) = *v {
            carry = Some(x);
        } else if carry.is_some() {
            *v = carry;
            filled += 1;
        }
    }
    filled
}

/// Quantile of the defined values with linear interpolation between order
/// statistics. `None` when nothing is defined.
pub fn quantile(values: &[Option<f64>], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().flatten().copied().collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Clamps defined values into [lo, hi]. Returns the number of changed values.
pub fn clip(values: &mut [Option<f64>], lo: f64, hi: f64) -> usize {
    let mut clipped = 0;
    for x in values.iter_mut().flatten() {
        let bounded = x.max(lo).min(hi);
        if bounded != *x {
            *x = bounded;
            clipped += 1;
        }
    }
    clipped
}

// ---------------------------------------------------------------------------
// Per-station normalization
// ---------------------------------------------------------------------------

/// Normalizes one station's observations. `None` for an empty input.
pub fn normalize_station(
    station: &str,
    observations: &[(NaiveDateTime, Option<f64>)],
    config: &NormalizeConfig,
) -> Option<(StationSeries, RepairSummary)> {
    // 1. collapse duplicate timestamps
    let mut buckets: BTreeMap<NaiveDateTime, (f64, usize)> = BTreeMap::new();
    for (ts, value) in observations {
        let entry = buckets.entry(*ts).or_insert((0.0, 0));
        if let Some(v) = value {
            entry.0 += v;
            entry.1 += 1;
        }
    }
    let (&start, _) = buckets.first_key_value()?;
    let (&end, _) = buckets.last_key_value()?;

    // 2-3. complete hourly grid
    let grid_len = (end - start).num_hours() as usize + 1;
    let mut values: Vec<Option<f64>> = vec![None; grid_len];
    for (ts, (sum, count)) in &buckets {
        let delta = *ts - start;
        if delta.num_seconds() % 3600 != 0 {
            continue;
        }
        let offset = delta.num_hours() as usize;
        if *count > 0 {
            values[offset] = Some(sum / *count as f64);
        }
    }
    let condition = classify_station(&values);

    // 4-5. gap repair
    let interpolated = interpolate_gaps(&mut values, config.interpolation_limit);
    let filled = fill_forward_backward(&mut values);

    // 6. outlier clipping against the filled series
    let lo = quantile(&values, config.clip_lower_quantile);
    let hi = quantile(&values, config.clip_upper_quantile);
    let (clipped, clip_bounds) = match (lo, hi) {
        (Some(lo), Some(hi)) => (clip(&mut values, lo, hi), Some((lo, hi))),
        _ => (0, None),
    };

    let summary = RepairSummary {
        station: station.to_string(),
        observed_rows: observations.len(),
        duplicates_collapsed: observations.len() - buckets.len(),
        grid_len,
        interpolated,
        filled,
        clipped,
        clip_bounds,
        condition,
    };
    let series = StationSeries {
        station: station.to_string(),
        start,
        values,
    };
    Some((series, summary))
}

/// Normalizes every station of a long table.
///
/// Readings with an empty station identifier are ignored.
pub fn normalize_stations(long: &LongTable, config: &NormalizeConfig) -> NormalizedTable {
    let mut groups: Vec<(&str, Vec<(NaiveDateTime, Option<f64>)>)> = Vec::new();
    for reading in &long.readings {
        if reading.station.trim().is_empty() {
            continue;
        }
        let same_station = groups
            .last()
            .is_some_and(|(station, _)| *station == reading.station.as_str());
        if same_station {
            if let Some((_, obs)) = groups.last_mut() {
                obs.push((reading.timestamp, reading.value));
            }
        } else {
            groups.push((reading.station.as_str(), vec![(reading.timestamp, reading.value)]));
        }
    }

    let results: Vec<(StationSeries, RepairSummary)> = groups
        .par_iter()
        .filter_map(|(station, obs)| normalize_station(station, obs, config))
        .collect();

    let mut series = Vec::with_capacity(results.len());
    let mut repairs = Vec::with_capacity(results.len());
    for (s, r) in results {
        logging::log_station_condition(&r.station, r.condition, r.grid_len);
        if r.clipped > 0 {
            logging::debug(
                Stage::Normalize,
                Some(&r.station),
                &format!("{} {} values clipped", long.pollutant, r.clipped),
            );
        }
        series.push(s);
        repairs.push(r);
    }

    let degenerate = repairs
        .iter()
        .filter(|r| r.condition.is_degenerate())
        .count();
    let usable = repairs
        .iter()
        .filter(|r| r.condition != StationCondition::AllMissing)
        .count();
    logging::log_stage_summary(Stage::Normalize, repairs.len(), usable, degenerate);

    NormalizedTable {
        pollutant: long.pollutant,
        series,
        repairs,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LongReading;
    use chrono::{Duration, NaiveDate};

    fn ts(hour_offset: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(hour_offset)
    }

    fn config() -> NormalizeConfig {
        NormalizeConfig::default()
    }

    // --- Interpolation ------------------------------------------------------

    #[test]
    fn test_gap_of_six_is_fully_interpolated() {
        let mut v = vec![Some(0.0), None, None, None, None, None, None, Some(7.0)];
        let n = interpolate_gaps(&mut v, 6);
        assert_eq!(n, 6);
        for (i, x) in v.iter().enumerate() {
            assert_eq!(*x, Some(i as f64));
        }
    }

    #[test]
    fn test_gap_of_seven_is_partially_interpolated() {
        let mut v = vec![Some(0.0), None, None, None, None, None, None, None, Some(8.0)];
        let n = interpolate_gaps(&mut v, 6);
        assert_eq!(n, 6);
        assert_eq!(v[6], Some(6.0));
        assert_eq!(v[7], None, "seventh missing hour is left for the fill step");

        let filled = fill_forward_backward(&mut v);
        assert_eq!(filled, 1);
        assert_eq!(v[7], Some(6.0));
    }

    #[test]
    fn test_interpolation_leaves_edges_alone() {
        let mut v = vec![None, Some(1.0), None, Some(3.0), None];
        interpolate_gaps(&mut v, 6);
        assert_eq!(v, vec![None, Some(1.0), Some(2.0), Some(3.0), None]);
        fill_forward_backward(&mut v);
        assert_eq!(v, vec![Some(1.0), Some(1.0), Some(2.0), Some(3.0), Some(3.0)]);
    }

    #[test]
    fn test_fill_on_all_missing_is_a_no_op() {
        let mut v = vec![None, None, None];
        assert_eq!(interpolate_gaps(&mut v, 6), 0);
        assert_eq!(fill_forward_backward(&mut v), 0);
        assert!(v.iter().all(|x| x.is_none()));
    }

    // --- Quantiles and clipping --------------------------------------------

    #[test]
    fn test_quantile_interpolates_between_order_statistics() {
        let v: Vec<Option<f64>> = (1..=5).map(|x| Some(x as f64)).collect();
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 0.5), Some(3.0));
        assert_eq!(quantile(&v, 1.0), Some(5.0));
        assert!((quantile(&v, 0.99).unwrap() - 4.96).abs() < 1e-12);
        assert_eq!(quantile(&[None], 0.5), None);
    }

    #[test]
    fn test_clip_with_equal_bounds_is_a_no_op_on_constant_series() {
        let mut v = vec![Some(5.0); 4];
        assert_eq!(clip(&mut v, 5.0, 5.0), 0);
        assert_eq!(v, vec![Some(5.0); 4]);
    }

    // --- Station normalization ---------------------------------------------

    #[test]
    fn test_duplicates_are_averaged_and_grid_is_complete() {
        let obs = vec![
            (ts(0), Some(10.0)),
            (ts(0), Some(20.0)),
            (ts(0), None),
            (ts(3), Some(30.0)),
        ];
        let (series, summary) = normalize_station("중구", &obs, &config()).unwrap();
        assert_eq!(summary.duplicates_collapsed, 2);
        assert_eq!(summary.grid_len, 4);
        let grid: Vec<_> = (0..series.len()).map(|i| series.timestamp_at(i)).collect();
        assert_eq!(grid, vec![ts(0), ts(1), ts(2), ts(3)]);
        // 15 -> 30 interpolated, then clipped into [q01, q99]
        let lo = summary.clip_bounds.unwrap().0;
        assert!(series.values.iter().all(|v| v.unwrap() >= lo));
        assert!(series.values.iter().all(|v| v.is_some()));
    }

    #[test]
    fn test_spike_is_clipped_to_upper_quantile() {
        let mut obs: Vec<_> = (0..100).map(|h| (ts(h), Some(20.0 + (h % 5) as f64))).collect();
        obs[50].1 = Some(240.0);
        let (series, summary) = normalize_station("중구", &obs, &config()).unwrap();
        let (lo, hi) = summary.clip_bounds.unwrap();
        assert!(hi < 240.0);
        assert!(summary.clipped >= 1);
        for v in series.values.iter().flatten() {
            assert!(*v >= lo && *v <= hi);
        }
    }

    #[test]
    fn test_degenerate_stations_do_not_fail() {
        let all_missing = vec![(ts(0), None), (ts(5), None)];
        let (series, summary) = normalize_station("a", &all_missing, &config()).unwrap();
        assert_eq!(summary.condition, StationCondition::AllMissing);
        assert_eq!(series.len(), 6);
        assert!(series.values.iter().all(|v| v.is_none()));
        assert_eq!(summary.clip_bounds, None);

        let single = vec![(ts(2), Some(9.0))];
        let (series, summary) = normalize_station("b", &single, &config()).unwrap();
        assert_eq!(summary.condition, StationCondition::SingleObservation);
        assert_eq!(series.values, vec![Some(9.0)]);

        let constant = vec![(ts(0), Some(4.0)), (ts(3), Some(4.0))];
        let (series, summary) = normalize_station("c", &constant, &config()).unwrap();
        assert_eq!(summary.condition, StationCondition::Constant);
        assert_eq!(summary.clipped, 0);
        assert_eq!(series.values, vec![Some(4.0); 4]);

        assert!(normalize_station("d", &[], &config()).is_none());
    }

    #[test]
    fn test_blank_station_ids_are_skipped() {
        let mut long = LongTable::empty(Pollutant::Pm10);
        for station in ["", "  ", "중구"] {
            for h in 0..4 {
                let timestamp = ts(h);
                long.readings.push(LongReading {
                    station: station.to_string(),
                    timestamp,
                    hour: h as u32,
                    value: Some(10.0 + h as f64),
                    record: 0,
                });
            }
        }
        let table = normalize_stations(&long, &config());

        assert_eq!(table.series.len(), 1);
        assert_eq!(table.series[0].station, "중구");
        assert_eq!(table.repairs.len(), 1);
        assert_eq!(table.repairs[0].station, "중구");
        assert!(table.station("").is_none());
        assert!(table.station("  ").is_none());
    }
}
