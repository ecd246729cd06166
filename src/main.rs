use airmon_service::config::PipelineConfig;
use airmon_service::logging::{self, Stage};
use airmon_service::{config, pipeline, report};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "airmon_service",
    version,
    about = "Builds one-hour-ahead PM10/PM2.5 training matrices from wide station CSVs"
)]
struct Cli {
    /// TOML configuration file (defaults to $AIRMON_CONFIG or ./airmon.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of PM10 wide CSV files
    #[arg(long = "pm10-dir")]
    pm10_dir: Option<PathBuf>,

    /// Directory of PM2.5 wide CSV files
    #[arg(long = "pm25-dir")]
    pm25_dir: Option<PathBuf>,

    /// Write X_train/X_test/Y_train/Y_test CSVs here
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Write the JSON run report here
    #[arg(long)]
    report: Option<PathBuf>,

    /// debug, info, warn or error
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

fn resolve_config(cli: Cli) -> Result<PipelineConfig, airmon_service::model::PipelineError> {
    let mut config = match &cli.config {
        Some(path) => {
            dotenv::dotenv().ok();
            let mut c = config::load_config(path)?;
            c.apply_env_overrides();
            c
        }
        None => PipelineConfig::from_env_or_default()?,
    };
    if let Some(dir) = cli.pm10_dir {
        config.source.pm10_dir = dir;
    }
    if let Some(dir) = cli.pm25_dir {
        config.source.pm25_dir = dir;
    }
    if let Some(dir) = cli.output_dir {
        config.output.export_dir = Some(dir);
    }
    if let Some(path) = cli.report {
        config.output.report_path = Some(path);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match resolve_config(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // validate() has already accepted the level
    let level = config.logging.min_level().unwrap_or(logging::LogLevel::Info);
    logging::init_logger(
        level,
        config.logging.file.as_deref(),
        config.logging.console_timestamps,
    );

    match pipeline::run(&config) {
        Ok(output) => {
            report::print_summary(&output.report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            logging::error(Stage::System, None, &format!("pipeline failed: {}", e));
            ExitCode::FAILURE
        }
    }
}
