//! Air-quality forecasting data pipeline.
//!
//! Reads per-station wide hourly PM10 and PM2.5 tables, regularizes every
//! station onto a gap-free hourly grid, derives leakage-free lag and rolling
//! features, and emits chronologically split supervised matrices for a
//! one-hour-ahead multi-output regressor.

pub mod config;
pub mod features;
pub mod forecast;
pub mod ingest;
pub mod logging;
pub mod matrix;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod reshape;
pub mod schema;
