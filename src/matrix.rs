//! Supervised matrix construction.
//!
//! Turns the feature table into row-aligned X/Y matrices:
//!
//! - labels are the next grid step's pollutant values for the same station;
//! - rows with any undefined numeric feature or label are dropped;
//! - categorical columns are one-hot encoded over the categories seen in the
//!   kept rows, plus a reserved `<column>_nan` indicator;
//! - each station's kept rows are split chronologically by percentile rank,
//!   so no test row of a station precedes any of its train rows.

use crate::logging::{self, Stage};
use crate::model::{FeatureRow, FeatureTable, PipelineError, Pollutant};
use crate::schema::FeatureSchema;
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Forecast horizon in grid steps.
pub const FORECAST_HORIZON: usize = 1;

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Dense row-major float matrix with named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Matrix {
    pub fn new(columns: Vec<String>) -> Self {
        Matrix {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Copy of one column, `None` for an unknown name.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx]).collect())
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), PipelineError> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
        writer
            .write_record(&self.columns)
            .map_err(|e| PipelineError::csv(path, e))?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|v| v.to_string()))
                .map_err(|e| PipelineError::csv(path, e))?;
        }
        writer.flush().map_err(|e| PipelineError::io(path, e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Split output
// ---------------------------------------------------------------------------

/// (station, timestamp) of a matrix row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowKey {
    pub station: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupervisedSplit {
    pub x_train: Matrix,
    pub x_test: Matrix,
    pub y_train: Matrix,
    pub y_test: Matrix,
    pub train_keys: Vec<RowKey>,
    pub test_keys: Vec<RowKey>,
    /// Feature rows dropped for an undefined feature or label.
    pub dropped_rows: usize,
}

impl SupervisedSplit {
    pub fn labeled_rows(&self) -> usize {
        self.x_train.len() + self.x_test.len()
    }

    /// Writes `X_train.csv`, `X_test.csv`, `Y_train.csv` and `Y_test.csv`.
    pub fn export(&self, dir: &Path) -> Result<(), PipelineError> {
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        self.x_train.write_csv(&dir.join("X_train.csv"))?;
        self.x_test.write_csv(&dir.join("X_test.csv"))?;
        self.y_train.write_csv(&dir.join("Y_train.csv"))?;
        self.y_test.write_csv(&dir.join("Y_test.csv"))?;
        logging::info(
            Stage::Matrix,
            None,
            &format!("exported train/test matrices to {}", dir.display()),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Column resolution
// ---------------------------------------------------------------------------

enum NumericSource {
    Hour,
    DayOfWeek,
    Month,
    Derived(usize),
    Meta(String),
}

fn numeric_sources(table: &FeatureTable, schema: &FeatureSchema) -> Vec<NumericSource> {
    schema
        .numeric_columns()
        .into_iter()
        .map(|name| match name {
            "hour" => NumericSource::Hour,
            "dow" => NumericSource::DayOfWeek,
            "month" => NumericSource::Month,
            other => match table.derived_index(other) {
                Some(i) => NumericSource::Derived(i),
                None => NumericSource::Meta(other.to_string()),
            },
        })
        .collect()
}

fn numeric_value(table: &FeatureTable, row: &FeatureRow, source: &NumericSource) -> Option<f64> {
    match source {
        NumericSource::Hour => Some(row.hour as f64),
        NumericSource::DayOfWeek => Some(row.day_of_week as f64),
        NumericSource::Month => Some(row.month as f64),
        NumericSource::Derived(i) => row.derived.get(*i).copied().flatten(),
        NumericSource::Meta(col) => table
            .metadata
            .get(&row.station)
            .and_then(|m| m.get(col))
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite()),
    }
}

fn category_value(
    table: &FeatureTable,
    schema: &FeatureSchema,
    row: &FeatureRow,
    column: &str,
) -> Option<String> {
    if column == schema.station_column {
        return Some(row.station.clone());
    }
    table
        .metadata
        .get(&row.station)
        .and_then(|m| m.get(column))
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

struct LabeledRow {
    key: RowKey,
    numeric: Vec<f64>,
    categories: Vec<Option<String>>,
    labels: Vec<f64>,
}

/// Builds labeled train/test matrices from a feature table.
pub fn build_supervised(
    table: &FeatureTable,
    schema: &FeatureSchema,
    train_fraction: f64,
) -> SupervisedSplit {
    let sources = numeric_sources(table, schema);
    let numeric_names: Vec<String> = schema
        .numeric_columns()
        .into_iter()
        .map(String::from)
        .collect();
    let categorical: Vec<&str> = schema.categorical_columns();
    let targets: Vec<String> = schema
        .target_columns()
        .into_iter()
        .map(String::from)
        .collect();

    // labels and drop-undefined, per station
    let mut per_station: Vec<Vec<LabeledRow>> = Vec::with_capacity(table.station_ranges.len());
    let mut dropped = 0;
    for (_, range) in &table.station_ranges {
        let rows = &table.rows[range.clone()];
        let mut kept = Vec::new();
        for (t, row) in rows.iter().enumerate() {
            let labels: Option<Vec<f64>> = Pollutant::ALL
                .iter()
                .map(|p| rows.get(t + FORECAST_HORIZON).and_then(|next| next.value(*p)))
                .collect();
            let numeric: Option<Vec<f64>> = sources
                .iter()
                .map(|s| numeric_value(table, row, s))
                .collect();
            match (labels, numeric) {
                (Some(labels), Some(numeric)) => kept.push(LabeledRow {
                    key: RowKey {
                        station: row.station.clone(),
                        timestamp: row.timestamp,
                    },
                    numeric,
                    categories: categorical
                        .iter()
                        .map(|c| category_value(table, schema, row, c))
                        .collect(),
                    labels,
                }),
                _ => dropped += 1,
            }
        }
        per_station.push(kept);
    }

    // one-hot vocabulary over kept rows, sorted per column
    let vocabularies: Vec<Vec<String>> = (0..categorical.len())
        .map(|ci| {
            let set: BTreeSet<&str> = per_station
                .iter()
                .flatten()
                .filter_map(|r| r.categories[ci].as_deref())
                .collect();
            set.into_iter().map(String::from).collect()
        })
        .collect();

    let mut x_columns = numeric_names;
    for (col, vocab) in categorical.iter().zip(&vocabularies) {
        for value in vocab {
            x_columns.push(format!("{}_{}", col, value));
        }
        x_columns.push(format!("{}_nan", col));
    }

    let mut split = SupervisedSplit {
        x_train: Matrix::new(x_columns.clone()),
        x_test: Matrix::new(x_columns),
        y_train: Matrix::new(targets.clone()),
        y_test: Matrix::new(targets),
        train_keys: Vec::new(),
        test_keys: Vec::new(),
        dropped_rows: dropped,
    };

    for kept in per_station {
        let n = kept.len();
        for (i, row) in kept.into_iter().enumerate() {
            let mut x = row.numeric;
            for (ci, vocab) in vocabularies.iter().enumerate() {
                let value = row.categories[ci].as_deref();
                for v in vocab {
                    x.push(if value == Some(v.as_str()) { 1.0 } else { 0.0 });
                }
                x.push(if value.is_none() { 1.0 } else { 0.0 });
            }

            let rank = (i + 1) as f64 / n as f64;
            if rank <= train_fraction {
                split.x_train.rows.push(x);
                split.y_train.rows.push(row.labels);
                split.train_keys.push(row.key);
            } else {
                split.x_test.rows.push(x);
                split.y_test.rows.push(row.labels);
                split.test_keys.push(row.key);
            }
        }
    }

    logging::info(
        Stage::Matrix,
        None,
        &format!(
            "{} labeled rows ({} dropped): {} train / {} test, {} feature columns",
            split.labeled_rows(),
            split.dropped_rows,
            split.x_train.len(),
            split.x_test.len(),
            split.x_train.columns.len()
        ),
    );
    split
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
