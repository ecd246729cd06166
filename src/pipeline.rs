//! End-to-end pipeline: wide CSV directories → train/test matrices.
//!
//! The two pollutants travel independently through reshape and
//! normalization (run side by side on the rayon pool) and meet at the merge.

use crate::config::PipelineConfig;
use crate::features::build_features;
use crate::forecast::{PersistenceBaseline, fit_and_evaluate};
use crate::ingest::load_wide_directory;
use crate::logging::{self, Stage};
use crate::matrix::{SupervisedSplit, build_supervised};
use crate::merge::merge_pollutants;
use crate::model::{FeatureTable, LongTable, PipelineError, Pollutant, StationMetadata, WideTable};
use crate::normalize::normalize_stations;
use crate::report::{IngestStats, NormalizeStats, PipelineReport, save_report};
use crate::reshape::{station_metadata, wide_to_long};
use crate::schema::FeatureSchema;

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub features: FeatureTable,
    pub schema: FeatureSchema,
    pub split: SupervisedSplit,
    pub report: PipelineReport,
}

/// Reads both pollutant directories.
pub fn load_sources(config: &PipelineConfig) -> Result<(WideTable, WideTable), PipelineError> {
    let layout = &config.source.layout;
    let pm10 = load_wide_directory(config.source.dir_for(Pollutant::Pm10), layout)?;
    let pm25 = load_wide_directory(config.source.dir_for(Pollutant::Pm25), layout)?;
    Ok((pm10, pm25))
}

/// PM2.5 metadata first; stations only present in the PM10 source fall back
/// to its records.
fn combined_metadata(pm10: &LongTable, pm25: &LongTable) -> StationMetadata {
    let mut metadata = station_metadata(pm25);
    for (station, record) in station_metadata(pm10) {
        metadata.entry(station).or_insert(record);
    }
    metadata
}

fn union_columns(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for col in b {
        if !out.contains(col) {
            out.push(col.clone());
        }
    }
    out
}

/// Runs reshape → normalize → merge → features → matrix on in-memory tables.
pub fn prepare_from_tables(
    pm10_wide: &WideTable,
    pm25_wide: &WideTable,
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    let layout = &config.source.layout;
    let mut report = PipelineReport::new();

    let long10 = wide_to_long(pm10_wide, Pollutant::Pm10, layout);
    let long25 = wide_to_long(pm25_wide, Pollutant::Pm25, layout);
    report.ingest.push(IngestStats::from_tables(pm10_wide, &long10));
    report.ingest.push(IngestStats::from_tables(pm25_wide, &long25));
    let metadata = combined_metadata(&long10, &long25);

    let (norm10, norm25) = rayon::join(
        || normalize_stations(&long10, &config.normalize),
        || normalize_stations(&long25, &config.normalize),
    );
    report.normalize.push(NormalizeStats::from_table(&norm10));
    report.normalize.push(NormalizeStats::from_table(&norm25));

    let merged = merge_pollutants(&norm10, &norm25, &metadata);
    report.merged_stations = merged.len();
    report.merged_rows = merged.iter().map(|m| m.len()).sum();
    if merged.is_empty() {
        logging::warn(Stage::Merge, None, "no station has both PM10 and PM2.5 data");
    }

    let features = build_features(&merged);
    report.feature_rows = features.len();

    let meta_columns = union_columns(&long10.meta_columns, &long25.meta_columns);
    for col in &config.matrix.categorical_columns {
        if *col != layout.station_column && !meta_columns.contains(col) {
            logging::warn(
                Stage::Matrix,
                None,
                &format!("categorical column '{}' not found in input; encoded as missing", col),
            );
        }
    }
    let schema = FeatureSchema::build(
        &layout.station_column,
        &features.derived_columns,
        &meta_columns,
        &config.matrix.categorical_columns,
        &config.matrix.numeric_metadata,
    )?;

    let split = build_supervised(&features, &schema, config.matrix.train_fraction);
    report.record_split(&split);

    Ok(PipelineOutput {
        features,
        schema,
        split,
        report,
    })
}

/// Full batch run: load, prepare, score the persistence baseline, then
/// write whatever outputs the configuration asks for.
pub fn run(config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    logging::info(
        Stage::System,
        None,
        &format!(
            "reading PM10 from {} and PM2.5 from {}",
            config.source.pm10_dir.display(),
            config.source.pm25_dir.display()
        ),
    );
    let (pm10, pm25) = load_sources(config)?;
    let mut output = prepare_from_tables(&pm10, &pm25, config)?;

    if output.split.x_train.is_empty() {
        logging::warn(Stage::Model, None, "no training rows; baseline not fitted");
    } else {
        let mut baseline = PersistenceBaseline::from_config(&config.model);
        output.report.metrics = fit_and_evaluate(&mut baseline, &output.split)?;
    }

    if let Some(dir) = &config.output.export_dir {
        output.split.export(dir)?;
    }
    if let Some(path) = &config.output.report_path {
        save_report(&output.report, path)?;
        logging::info(
            Stage::System,
            None,
            &format!("report written to {}", path.display()),
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WideRow;
    use std::collections::BTreeMap;

    #[test]
    fn test_union_columns_keeps_first_seen_order() {
        let a = vec!["측정망".to_string(), "주소".to_string()];
        let b = vec!["주소".to_string(), "지역".to_string()];
        assert_eq!(union_columns(&a, &b), vec!["측정망", "주소", "지역"]);
    }

    fn wide(station: &str, network: &str, days: u32, scale: f64) -> WideTable {
        let rows = (1..=days)
            .map(|d| {
                let mut meta = BTreeMap::new();
                meta.insert("측정망".to_string(), network.to_string());
                WideRow {
                    date: format!("2024-03-{:02}", d),
                    station: station.to_string(),
                    meta,
                    slots: (0..24)
                        .map(|h| Some(format!("{}", scale * (10 + (h * 7 + d as usize) % 9) as f64)))
                        .collect(),
                }
            })
            .collect();
        WideTable {
            meta_columns: vec!["측정망".to_string()],
            rows,
            files_read: 1,
        }
    }

    #[test]
    fn test_station_metadata_comes_from_pm25_source() {
        let pm10 = wide("중구", "PM10NET", 4, 2.0);
        let pm25 = wide("중구", "PM25NET", 4, 1.0);
        let out = prepare_from_tables(&pm10, &pm25, &PipelineConfig::default()).unwrap();

        let network_cols: Vec<&str> = out
            .split
            .x_train
            .columns
            .iter()
            .map(String::as_str)
            .filter(|c| c.starts_with("측정망_"))
            .collect();
        assert_eq!(network_cols, vec!["측정망_PM25NET", "측정망_nan"]);
        assert_eq!(out.features.metadata["중구"].get("측정망"), Some("PM25NET"));
    }

    #[test]
    fn test_combined_metadata_falls_back_to_pm10() {
        let layout = crate::schema::SourceLayout::default();
        let long10 = wide_to_long(&wide("종로구", "PM10NET", 1, 1.0), Pollutant::Pm10, &layout);
        let long25 = wide_to_long(&wide("중구", "PM25NET", 1, 1.0), Pollutant::Pm25, &layout);
        let metadata = combined_metadata(&long10, &long25);
        assert_eq!(metadata["종로구"].get("측정망"), Some("PM10NET"));
        assert_eq!(metadata["중구"].get("측정망"), Some("PM25NET"));
    }

    #[test]
    fn test_empty_inputs_produce_empty_split() {
        let config = PipelineConfig::default();
        let out =
            prepare_from_tables(&WideTable::default(), &WideTable::default(), &config).unwrap();
        assert!(out.features.is_empty());
        assert_eq!(out.report.labeled_rows, 0);
        assert!(out.split.x_train.is_empty());
    }
}
