/// Structured logging for the forecasting pipeline
///
/// Provides context-rich logging with pipeline stage and station
/// identifiers, timestamps, and severity levels. Supports both console
/// output and file-based logging for batch runs.

use crate::model::PipelineError;
use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(PipelineError::Config(format!(
                "unknown log level '{}'; use debug, info, warn or error",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Reshape,
    Normalize,
    Merge,
    Features,
    Matrix,
    Model,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ingest => write!(f, "INGEST"),
            Stage::Reshape => write!(f, "RESHAPE"),
            Stage::Normalize => write!(f, "NORMALIZE"),
            Stage::Merge => write!(f, "MERGE"),
            Stage::Features => write!(f, "FEATURES"),
            Stage::Matrix => write!(f, "MATRIX"),
            Stage::Model => write!(f, "MODEL"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Station Condition Classification
// ---------------------------------------------------------------------------

/// How usable a station's series was going into normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StationCondition {
    /// At least two distinct observed values.
    Healthy,
    /// No observed value at all; the series stays unresolved.
    AllMissing,
    /// Exactly one observed value; fill makes the series constant.
    SingleObservation,
    /// Several observations, all equal; clipping is a no-op.
    Constant,
}

impl fmt::Display for StationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationCondition::Healthy => write!(f, "HEALTHY"),
            StationCondition::AllMissing => write!(f, "ALL_MISSING"),
            StationCondition::SingleObservation => write!(f, "SINGLE_OBSERVATION"),
            StationCondition::Constant => write!(f, "CONSTANT"),
        }
    }
}

impl StationCondition {
    pub fn is_degenerate(&self) -> bool {
        *self != StationCondition::Healthy
    }
}

/// Classify a station from its observed (pre-fill) values.
pub fn classify_station(observed: &[Option<f64>]) -> StationCondition {
    let mut defined = observed.iter().flatten();
    let Some(first) = defined.next() else {
        return StationCondition::AllMissing;
    };
    let mut count = 1;
    let mut all_equal = true;
    for v in defined {
        count += 1;
        if v != first {
            all_equal = false;
        }
    }
    if count == 1 {
        StationCondition::SingleObservation
    } else if all_equal {
        StationCondition::Constant
    } else {
        StationCondition::Healthy
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn format_entry(level: LogLevel, stage: Stage, station: Option<&str>, message: &str) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let station_part = station.map(|s| format!(" [{}]", s)).unwrap_or_default();
        format!("{} {} {}{}: {}", timestamp, level, stage, station_part, message)
    }

    fn log(&self, level: LogLevel, stage: Stage, station: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let log_entry = Self::format_entry(level, stage, station, message);
        let station_part = station.map(|s| format!(" [{}]", s)).unwrap_or_default();

        // Console output
        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", stage, station_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", stage, station_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", stage, station_part, message),
            }
        }

        // File output
        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, stage: Stage, station: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, stage, station, message);
        }
    }
}

/// Log a general informational message
pub fn info(stage: Stage, station: Option<&str>, message: &str) {
    emit(LogLevel::Info, stage, station, message);
}

/// Log a warning message
pub fn warn(stage: Stage, station: Option<&str>, message: &str) {
    emit(LogLevel::Warning, stage, station, message);
}

/// Log an error message
pub fn error(stage: Stage, station: Option<&str>, message: &str) {
    emit(LogLevel::Error, stage, station, message);
}

/// Log a debug message
pub fn debug(stage: Stage, station: Option<&str>, message: &str) {
    emit(LogLevel::Debug, stage, station, message);
}

// ---------------------------------------------------------------------------
// Structured Station Logging
// ---------------------------------------------------------------------------

/// Log a degenerate station at a level matching how much it degrades output.
///
/// All-missing stations contribute no usable rows downstream, so they warn;
/// single-value and constant stations still produce rows and only debug-log.
pub fn log_station_condition(station: &str, condition: StationCondition, grid_len: usize) {
    let message = format!("degenerate series [{}] over {} grid hours", condition, grid_len);
    match condition {
        StationCondition::Healthy => {}
        StationCondition::AllMissing => warn(Stage::Normalize, Some(station), &message),
        StationCondition::SingleObservation | StationCondition::Constant => {
            debug(Stage::Normalize, Some(station), &message)
        }
    }
}

// ---------------------------------------------------------------------------
// Stage Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a per-station stage
pub fn log_stage_summary(stage: Stage, total: usize, usable: usize, degenerate: usize) {
    let message = format!(
        "{} complete: {}/{} stations usable, {} degenerate",
        stage, usable, total, degenerate
    );

    if total == 0 {
        warn(stage, None, &format!("{} complete: no stations in input", stage));
    } else if usable == 0 {
        error(stage, None, &message);
    } else if degenerate > 0 {
        warn(stage, None, &message);
    } else {
        info(stage, None, &message);
    }
}
