//! Pipeline configuration.
//!
//! Configuration is read from a TOML file whose every field has a default, so
//! an empty file (or no file at all) yields the reference setup: `./10/` and
//! `./2.5/` input directories, the Korean wide-table headers, 6-hour
//! interpolation limit, 1%/99% clipping and an 80/20 chronological split.
//!
//! Environment variables (optionally from `.env`) override the file:
//! `AIRMON_CONFIG`, `AIRMON_PM10_DIR`, `AIRMON_PM25_DIR`, `AIRMON_OUTPUT_DIR`,
//! `AIRMON_LOG_LEVEL`.

use crate::logging::LogLevel;
use crate::model::{PipelineError, Pollutant};
use crate::schema::SourceLayout;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "./airmon.toml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub pm10_dir: PathBuf,
    pub pm25_dir: PathBuf,
    #[serde(flatten)]
    pub layout: SourceLayout,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            pm10_dir: PathBuf::from("./10/"),
            pm25_dir: PathBuf::from("./2.5/"),
            layout: SourceLayout::default(),
        }
    }
}

impl SourceConfig {
    pub fn dir_for(&self, pollutant: Pollutant) -> &Path {
        match pollutant {
            Pollutant::Pm10 => &self.pm10_dir,
            Pollutant::Pm25 => &self.pm25_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Longest run of missing hours bridged by interpolation.
    pub interpolation_limit: usize,
    pub clip_lower_quantile: f64,
    pub clip_upper_quantile: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        NormalizeConfig {
            interpolation_limit: 6,
            clip_lower_quantile: 0.01,
            clip_upper_quantile: 0.99,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Rows at or below this percentile rank within a station go to train.
    pub train_fraction: f64,
    pub categorical_columns: Vec<String>,
    /// Metadata columns parsed as numbers and copied into X.
    pub numeric_metadata: Vec<String>,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        let layout = SourceLayout::default();
        MatrixConfig {
            train_fraction: 0.8,
            categorical_columns: vec![layout.station_column, layout.network_column],
            numeric_metadata: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Feature column the baseline copies as its PM10 prediction.
    pub pm10_source: String,
    /// Feature column the baseline copies as its PM2.5 prediction.
    pub pm25_source: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            pm10_source: "pm10_lag_1".to_string(),
            pm25_source: "pm25_lag_1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving X_train/X_test/Y_train/Y_test CSVs.
    pub export_dir: Option<PathBuf>,
    /// JSON run report path.
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            console_timestamps: false,
        }
    }
}

impl LoggingConfig {
    pub fn min_level(&self) -> Result<LogLevel, PipelineError> {
        self.level.parse()
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub normalize: NormalizeConfig,
    pub matrix: MatrixConfig,
    pub model: ModelConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env`, then the file named by `AIRMON_CONFIG` (or the default
    /// path if it exists), then applies environment overrides.
    pub fn from_env_or_default() -> Result<Self, PipelineError> {
        dotenv::dotenv().ok();
        let path = env::var("AIRMON_CONFIG").ok().map(PathBuf::from);
        let mut config = match path {
            Some(p) => load_config(&p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => load_config(DEFAULT_CONFIG_PATH)?,
            None => PipelineConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("AIRMON_PM10_DIR") {
            self.source.pm10_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("AIRMON_PM25_DIR") {
            self.source.pm25_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("AIRMON_OUTPUT_DIR") {
            self.output.export_dir = Some(PathBuf::from(dir));
        }
        if let Ok(level) = env::var("AIRMON_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.source.layout.validate()?;

        let n = &self.normalize;
        if n.interpolation_limit == 0 {
            return Err(PipelineError::Config(
                "interpolation_limit must be at least 1".to_string(),
            ));
        }
        let in_unit = |q: f64| (0.0..=1.0).contains(&q);
        if !in_unit(n.clip_lower_quantile) || !in_unit(n.clip_upper_quantile) {
            return Err(PipelineError::Config(format!(
                "clip quantiles must lie in [0, 1], got {} and {}",
                n.clip_lower_quantile, n.clip_upper_quantile
            )));
        }
        if n.clip_lower_quantile > n.clip_upper_quantile {
            return Err(PipelineError::Config(format!(
                "clip_lower_quantile {} exceeds clip_upper_quantile {}",
                n.clip_lower_quantile, n.clip_upper_quantile
            )));
        }

        let m = &self.matrix;
        if !(m.train_fraction > 0.0 && m.train_fraction <= 1.0) {
            return Err(PipelineError::Config(format!(
                "train_fraction must lie in (0, 1], got {}",
                m.train_fraction
            )));
        }
        let layout = &self.source.layout;
        if let Some(col) = m
            .categorical_columns
            .iter()
            .chain(m.numeric_metadata.iter())
            .find(|c| **c == layout.date_column)
        {
            return Err(PipelineError::Config(format!(
                "date column '{}' cannot be used as a feature",
                col
            )));
        }
        if m.numeric_metadata.iter().any(|c| *c == layout.station_column) {
            return Err(PipelineError::Config(format!(
                "station column '{}' cannot be numeric",
                layout.station_column
            )));
        }

        self.logging.min_level()?;
        Ok(())
    }
}

/// Reads and validates a TOML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<PipelineConfig, PipelineError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    PipelineConfig::from_toml_str(&text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
