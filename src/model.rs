/// Core data types for the air-quality forecasting pipeline.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no pipeline logic and no I/O: only types, plus the small
/// accessors that make the per-station arena layout convenient to walk.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

// ---------------------------------------------------------------------------
// Pollutants
// ---------------------------------------------------------------------------

/// The two particulate measures the pipeline forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pollutant {
    /// Particulate matter ≤ 10 µm.
    Pm10,
    /// Particulate matter ≤ 2.5 µm.
    Pm25,
}

impl Pollutant {
    /// Both pollutants in feature-column order.
    pub const ALL: [Pollutant; 2] = [Pollutant::Pm10, Pollutant::Pm25];

    /// Column name used for this pollutant's value in every table.
    pub fn column(&self) -> &'static str {
        match self {
            Pollutant::Pm10 => "pm10",
            Pollutant::Pm25 => "pm25",
        }
    }

    /// Column name of this pollutant's next-step label.
    pub fn target_column(&self) -> &'static str {
        match self {
            Pollutant::Pm10 => "y_pm10",
            Pollutant::Pm25 => "y_pm25",
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pollutant::Pm10 => write!(f, "PM10"),
            Pollutant::Pm25 => write!(f, "PM25"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wide format
// ---------------------------------------------------------------------------

/// One raw (date, station) row of a wide table.
///
/// `date` is kept as the raw cell text; the reshaper owns date parsing so that
/// an unparseable date degrades to a skipped row rather than a load failure.
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub date: String,
    pub station: String,
    /// Metadata cells keyed by column name. Empty cells are stored as "".
    pub meta: BTreeMap<String, String>,
    /// Raw hour-slot cells, index 0 = slot 1 ... index 23 = slot 24.
    /// `None` when the slot column is absent from the source file.
    pub slots: Vec<Option<String>>,
}

/// A wide table for a single pollutant, concatenated across source files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideTable {
    /// Metadata column names, union across files in first-seen order.
    pub meta_columns: Vec<String>,
    pub rows: Vec<WideRow>,
    /// Number of source files that contributed rows.
    pub files_read: usize,
}

impl WideTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Long format
// ---------------------------------------------------------------------------

/// Identifying and metadata cells of one source row, shared by all of the
/// long readings unpivoted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaRecord {
    /// Source calendar date, before any hour-24 rewrite.
    pub date: NaiveDate,
    pub station: String,
    pub meta: BTreeMap<String, String>,
}

impl MetaRecord {
    /// Metadata cell, treating empty cells as missing.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.meta
            .get(column)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }
}

/// One (station, timestamp, value) observation.
#[derive(Debug, Clone, PartialEq)]
pub struct LongReading {
    pub station: String,
    /// `date + hour`, with slot 24 already rewritten to next-day hour 0.
    pub timestamp: NaiveDateTime,
    /// Hour of day after the rewrite, 0..=23.
    pub hour: u32,
    pub value: Option<f64>,
    /// Index into `LongTable::records`.
    pub record: usize,
}

/// Long table for one pollutant, sorted by (station, timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct LongTable {
    pub pollutant: Pollutant,
    pub meta_columns: Vec<String>,
    pub records: Vec<MetaRecord>,
    pub readings: Vec<LongReading>,
    /// Wide rows dropped because their date could not be parsed.
    pub skipped_rows: usize,
}

impl LongTable {
    pub fn empty(pollutant: Pollutant) -> Self {
        LongTable {
            pollutant,
            meta_columns: Vec::new(),
            records: Vec::new(),
            readings: Vec::new(),
            skipped_rows: 0,
        }
    }

    pub fn missing_values(&self) -> usize {
        self.readings.iter().filter(|r| r.value.is_none()).count()
    }

    pub fn record_of(&self, reading: &LongReading) -> Option<&MetaRecord> {
        self.records.get(reading.record)
    }
}

/// First-seen metadata per station, keyed by station identifier.
pub type StationMetadata = BTreeMap<String, MetaRecord>;

// ---------------------------------------------------------------------------
// Station series
// ---------------------------------------------------------------------------

/// A per-station series on a complete hourly grid.
///
/// Position `i` holds the value at `start + i hours`; the grid therefore has
/// no gaps and no duplicates by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSeries {
    pub station: String,
    pub start: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

impl StationSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn timestamp_at(&self, offset: usize) -> NaiveDateTime {
        self.start + Duration::hours(offset as i64)
    }

    /// Last timestamp on the grid, `None` for an empty series.
    pub fn end(&self) -> Option<NaiveDateTime> {
        self.values.len().checked_sub(1).map(|i| self.timestamp_at(i))
    }

    /// Grid offset of `ts`, `None` if it falls outside the grid or between hours.
    pub fn offset_of(&self, ts: NaiveDateTime) -> Option<usize> {
        let delta = ts - self.start;
        if delta < Duration::zero() || delta.num_seconds() % 3600 != 0 {
            return None;
        }
        let offset = delta.num_hours() as usize;
        (offset < self.values.len()).then_some(offset)
    }
}

/// Both pollutants for one station over the intersection of their grids,
/// with the station's static metadata attached.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSeries {
    pub station: String,
    pub start: NaiveDateTime,
    pub pm10: Vec<Option<f64>>,
    pub pm25: Vec<Option<f64>>,
    pub meta: Option<MetaRecord>,
}

impl MergedSeries {
    pub fn len(&self) -> usize {
        self.pm10.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pm10.is_empty()
    }

    pub fn timestamp_at(&self, offset: usize) -> NaiveDateTime {
        self.start + Duration::hours(offset as i64)
    }
}

// ---------------------------------------------------------------------------
// Feature rows
// ---------------------------------------------------------------------------

/// One (station, timestamp) row of the feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub station: String,
    pub timestamp: NaiveDateTime,
    pub pm10: Option<f64>,
    pub pm25: Option<f64>,
    pub hour: u32,
    /// Monday = 0 ... Sunday = 6.
    pub day_of_week: u32,
    pub month: u32,
    /// Lag and rolling features, aligned with `FeatureTable::derived_columns`.
    pub derived: Vec<Option<f64>>,
}

impl FeatureRow {
    pub fn value(&self, pollutant: Pollutant) -> Option<f64> {
        match pollutant {
            Pollutant::Pm10 => self.pm10,
            Pollutant::Pm25 => self.pm25,
        }
    }
}

/// Feature rows for all stations, each station occupying a contiguous,
/// chronologically ordered range of `rows`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub derived_columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
    pub station_ranges: Vec<(String, Range<usize>)>,
    pub metadata: StationMetadata,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn derived_index(&self, column: &str) -> Option<usize> {
        self.derived_columns.iter().position(|c| c == column)
    }

    pub fn station_rows(&self, station: &str) -> &[FeatureRow] {
        self.station_ranges
            .iter()
            .find(|(s, _)| s == station)
            .map(|(_, range)| &self.rows[range.clone()])
            .unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can surface to the caller of the pipeline.
///
/// Row-level data problems never appear here; they are repaired or skipped
/// where they occur.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("{path} is missing required column '{column}'")]
    MissingColumn { path: String, column: String },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Model error: {0}")]
    Model(String),
}

impl PipelineError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn csv(path: impl AsRef<std::path::Path>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
