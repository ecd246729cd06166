//! Pipeline run report
//!
//! Counts gathered at each stage of a run, plus the baseline forecast
//! metrics. Printed as a console summary and optionally saved as JSON so
//! successive runs over the same directories can be compared.

use crate::forecast::TargetMetrics;
use crate::matrix::SupervisedSplit;
use crate::model::{LongTable, PipelineError, WideTable};
use crate::normalize::NormalizedTable;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// Report Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub pollutant: String,
    pub files_read: usize,
    pub wide_rows: usize,
    pub long_rows: usize,
    pub missing_values: usize,
    pub skipped_rows: usize,
}

impl IngestStats {
    pub fn from_tables(wide: &WideTable, long: &LongTable) -> Self {
        IngestStats {
            pollutant: long.pollutant.to_string(),
            files_read: wide.files_read,
            wide_rows: wide.rows.len(),
            long_rows: long.readings.len(),
            missing_values: long.missing_values(),
            skipped_rows: long.skipped_rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub pollutant: String,
    pub stations: usize,
    pub grid_rows: usize,
    pub interpolated: usize,
    pub filled: usize,
    pub clipped: usize,
    pub degenerate_stations: Vec<String>,
}

impl NormalizeStats {
    pub fn from_table(table: &NormalizedTable) -> Self {
        let repairs = &table.repairs;
        NormalizeStats {
            pollutant: table.pollutant.to_string(),
            stations: table.series.len(),
            grid_rows: table.grid_rows(),
            interpolated: repairs.iter().map(|r| r.interpolated).sum(),
            filled: repairs.iter().map(|r| r.filled).sum(),
            clipped: repairs.iter().map(|r| r.clipped).sum(),
            degenerate_stations: repairs
                .iter()
                .filter(|r| r.condition.is_degenerate())
                .map(|r| format!("{} ({})", r.station, r.condition))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub generated_at: String,
    pub ingest: Vec<IngestStats>,
    pub normalize: Vec<NormalizeStats>,
    pub merged_stations: usize,
    pub merged_rows: usize,
    pub feature_rows: usize,
    pub labeled_rows: usize,
    pub dropped_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub feature_columns: usize,
    pub metrics: Vec<TargetMetrics>,
}

impl PipelineReport {
    pub fn new() -> Self {
        PipelineReport {
            generated_at: Utc::now().to_rfc3339(),
            ingest: Vec::new(),
            normalize: Vec::new(),
            merged_stations: 0,
            merged_rows: 0,
            feature_rows: 0,
            labeled_rows: 0,
            dropped_rows: 0,
            train_rows: 0,
            test_rows: 0,
            feature_columns: 0,
            metrics: Vec::new(),
        }
    }

    pub fn record_split(&mut self, split: &SupervisedSplit) {
        self.labeled_rows = split.labeled_rows();
        self.dropped_rows = split.dropped_rows;
        self.train_rows = split.x_train.len();
        self.test_rows = split.x_test.len();
        self.feature_columns = split.x_train.columns.len();
    }
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Output
// ============================================================================

pub fn print_summary(report: &PipelineReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("AIR QUALITY PIPELINE SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    for s in &report.ingest {
        println!(
            "{:<5} ingest:     {} files, {} wide rows -> {} readings ({} missing, {} skipped)",
            s.pollutant, s.files_read, s.wide_rows, s.long_rows, s.missing_values, s.skipped_rows
        );
    }
    for s in &report.normalize {
        println!(
            "{:<5} normalize:  {} stations, {} grid rows ({} interpolated, {} filled, {} clipped)",
            s.pollutant, s.stations, s.grid_rows, s.interpolated, s.filled, s.clipped
        );
        for station in &s.degenerate_stations {
            println!("      degenerate: {}", station);
        }
    }
    println!();
    println!(
        "Merged:           {} stations, {} rows",
        report.merged_stations, report.merged_rows
    );
    println!("Feature rows:     {}", report.feature_rows);
    println!(
        "Labeled rows:     {} ({} dropped)",
        report.labeled_rows, report.dropped_rows
    );
    println!(
        "Split:            {} train / {} test, {} feature columns",
        report.train_rows, report.test_rows, report.feature_columns
    );

    if !report.metrics.is_empty() {
        println!();
        for m in &report.metrics {
            match (m.mae, m.rmse) {
                (Some(mae), Some(rmse)) => {
                    println!("{} MAE/RMSE: {:.3} {:.3}", m.label(), mae, rmse)
                }
                _ => println!("{} MAE/RMSE: n/a (no test rows)", m.label()),
            }
        }
    }
    println!("═══════════════════════════════════════════════════════════");
}

pub fn save_report(report: &PipelineReport, path: &Path) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

pub fn load_report(path: &Path) -> Result<PipelineReport, PipelineError> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}
