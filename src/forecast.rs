//! Regressor interface and forecast metrics.
//!
//! The pipeline stops at the train/test matrices; any multi-output model
//! that can fit X → Y plugs in through `MultiOutputRegressor`. The included
//! `PersistenceBaseline` predicts each target from one named feature column,
//! which with the default `*_lag_1` sources is "the next hour equals the
//! last observed hour".

use crate::config::ModelConfig;
use crate::logging::{self, Stage};
use crate::matrix::Matrix;
use crate::model::{PipelineError, Pollutant};
use serde::{Deserialize, Serialize};

pub trait MultiOutputRegressor {
    fn fit(&mut self, x: &Matrix, y: &Matrix) -> Result<(), PipelineError>;

    /// One output row per input row, columns named like the fitted targets.
    fn predict(&self, x: &Matrix) -> Result<Matrix, PipelineError>;
}

// ---------------------------------------------------------------------------
// Persistence baseline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PersistenceBaseline {
    /// (target column, feature column it is predicted from)
    sources: Vec<(String, String)>,
    fitted: Option<Vec<usize>>,
}

impl PersistenceBaseline {
    pub fn new(sources: Vec<(String, String)>) -> Self {
        PersistenceBaseline {
            sources,
            fitted: None,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        PersistenceBaseline::new(vec![
            (
                Pollutant::Pm10.target_column().to_string(),
                config.pm10_source.clone(),
            ),
            (
                Pollutant::Pm25.target_column().to_string(),
                config.pm25_source.clone(),
            ),
        ])
    }
}

impl MultiOutputRegressor for PersistenceBaseline {
    fn fit(&mut self, x: &Matrix, y: &Matrix) -> Result<(), PipelineError> {
        if x.len() != y.len() {
            return Err(PipelineError::Model(format!(
                "X has {} rows but Y has {}",
                x.len(),
                y.len()
            )));
        }
        let mut indices = Vec::with_capacity(self.sources.len());
        for (target, source) in &self.sources {
            if y.column_index(target).is_none() {
                return Err(PipelineError::Model(format!(
                    "target column '{}' not present in Y",
                    target
                )));
            }
            let idx = x.column_index(source).ok_or_else(|| {
                PipelineError::Model(format!("feature column '{}' not present in X", source))
            })?;
            indices.push(idx);
        }
        self.fitted = Some(indices);
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Matrix, PipelineError> {
        let indices = self
            .fitted
            .as_ref()
            .ok_or_else(|| PipelineError::Model("predict called before fit".to_string()))?;
        let columns = self.sources.iter().map(|(t, _)| t.clone()).collect();
        let mut out = Matrix::new(columns);
        for row in &x.rows {
            let mut pred = Vec::with_capacity(indices.len());
            for &i in indices {
                let v = row.get(i).copied().ok_or_else(|| {
                    PipelineError::Model(format!("X row has no column {}", i))
                })?;
                pred.push(v);
            }
            out.rows.push(pred);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMetrics {
    pub target: String,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub n: usize,
}

impl TargetMetrics {
    /// Console label: "PM10" for `y_pm10`.
    pub fn label(&self) -> String {
        self.target
            .strip_prefix("y_")
            .unwrap_or(&self.target)
            .to_uppercase()
    }
}

pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> Option<f64> {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return None;
    }
    let total: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).sum();
    Some(total / n as f64)
}

pub fn root_mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> Option<f64> {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return None;
    }
    let total: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    Some((total / n as f64).sqrt())
}

/// Per-target MAE and RMSE for every column of `y_true` that `y_pred` also has.
pub fn evaluate(y_true: &Matrix, y_pred: &Matrix) -> Vec<TargetMetrics> {
    y_true
        .columns
        .iter()
        .filter_map(|target| {
            let truth = y_true.column(target)?;
            let pred = y_pred.column(target)?;
            Some(TargetMetrics {
                target: target.clone(),
                mae: mean_absolute_error(&truth, &pred),
                rmse: root_mean_squared_error(&truth, &pred),
                n: truth.len().min(pred.len()),
            })
        })
        .collect()
}

/// Fits on the train split, scores on the test split.
pub fn fit_and_evaluate<M: MultiOutputRegressor>(
    model: &mut M,
    split: &crate::matrix::SupervisedSplit,
) -> Result<Vec<TargetMetrics>, PipelineError> {
    model.fit(&split.x_train, &split.y_train)?;
    let pred = model.predict(&split.x_test)?;
    let metrics = evaluate(&split.y_test, &pred);
    for m in &metrics {
        match (m.mae, m.rmse) {
            (Some(mae), Some(rmse)) => logging::info(
                Stage::Model,
                None,
                &format!("{} MAE/RMSE: {:.3} {:.3} ({} test rows)", m.label(), mae, rmse, m.n),
            ),
            _ => logging::warn(
                Stage::Model,
                None,
                &format!("{}: no test rows to score", m.label()),
            ),
        }
    }
    Ok(metrics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
