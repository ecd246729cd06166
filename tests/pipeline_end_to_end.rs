/// End-to-end tests over wide CSV directories on disk
///
/// Three stations report both pollutants for four days (96 grid hours);
/// a fourth reports PM10 only and must not survive the merge. Every merged
/// station has its own three-hour PM10 gap and its own tenfold PM10 spike.
///
/// Run with: cargo test --test pipeline_end_to_end

use airmon_service::config::PipelineConfig;
use airmon_service::ingest::load_wide_directory;
use airmon_service::model::Pollutant;
use airmon_service::normalize::normalize_stations;
use airmon_service::pipeline::{prepare_from_tables, run};
use airmon_service::report::load_report;
use airmon_service::reshape::wide_to_long;

use std::fs;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

const DAYS: usize = 4;
const DATES: [&str; DAYS] = ["2024-03-01", "2024-03-02", "2024-03-03", "2024-03-04"];

/// Grid hour index of (day, slot): 0 is 2024-03-01 01:00.
fn hour_index(day: usize, slot: usize) -> usize {
    day * 24 + slot - 1
}

fn base_value(station_idx: usize, h: usize) -> f64 {
    (20 + (h * 5) % 17 + station_idx * 3) as f64
}

const BOTH: [(&str, &str); 3] = [("강남구", "도로변대기"), ("마포구", "도시대기"), ("중구", "도시대기")];

/// (station, gap hours, spike hour) for each station in `BOTH`, in order.
const DAMAGE: [(&str, [usize; 3], usize); 3] = [
    ("강남구", [20, 21, 22], 50),
    ("마포구", [40, 41, 42], 70),
    ("중구", [33, 34, 35], 60),
];

fn pm10_cell(station: &str, station_idx: usize, h: usize) -> String {
    let damage = DAMAGE.iter().find(|(name, _, _)| *name == station);
    if let Some((_, gap, _)) = damage {
        if gap.contains(&h) {
            return "-".to_string();
        }
    }
    let v = base_value(station_idx, h);
    match damage {
        Some((_, _, spike)) if *spike == h => (v * 10.0).to_string(),
        _ => v.to_string(),
    }
}

fn pm25_cell(_station: &str, station_idx: usize, h: usize) -> String {
    (base_value(station_idx, h) / 2.0).to_string()
}

fn write_wide_csv(
    path: &Path,
    stations: &[(&str, &str)],
    cell: impl Fn(&str, usize, usize) -> String,
) {
    let mut text = String::from("date,측정망,측정소명");
    for slot in 1..=24 {
        text.push_str(&format!(",{}시", slot));
    }
    text.push_str(",지점ID\n");
    for (day, date) in DATES.iter().enumerate() {
        for (idx, (station, network)) in stations.iter().enumerate() {
            text.push_str(&format!("{},{},{}", date, network, station));
            for slot in 1..=24 {
                text.push(',');
                text.push_str(&cell(*station, idx, hour_index(day, slot)));
            }
            text.push_str(&format!(",1111{}\n", idx));
        }
    }
    fs::write(path, text).unwrap();
}

struct Fixture {
    root: TempDir,
    config: PipelineConfig,
}

fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let pm10_dir = root.path().join("10");
    let pm25_dir = root.path().join("2.5");
    fs::create_dir_all(&pm10_dir).unwrap();
    fs::create_dir_all(&pm25_dir).unwrap();

    write_wide_csv(&pm10_dir.join("pm10.csv"), &BOTH, pm10_cell);
    write_wide_csv(&pm10_dir.join("pm10_extra.csv"), &[("종로구", "도시대기")], pm10_cell);
    write_wide_csv(&pm25_dir.join("pm25.csv"), &BOTH, pm25_cell);

    let mut config = PipelineConfig::default();
    config.source.pm10_dir = pm10_dir;
    config.source.pm25_dir = pm25_dir;
    Fixture {
        root,
        config,
    }
}

// ---------------------------------------------------------------------------
// Normalization on real files
// ---------------------------------------------------------------------------

#[test]
fn test_gaps_are_interpolated_and_spikes_clipped_per_station() {
    let fx = fixture();
    let layout = &fx.config.source.layout;
    let wide = load_wide_directory(&fx.config.source.pm10_dir, layout).unwrap();
    assert_eq!(wide.files_read, 2);

    let long = wide_to_long(&wide, Pollutant::Pm10, layout);
    assert_eq!(long.readings.len(), 4 * DAYS * 24);
    let gap_total: usize = DAMAGE.iter().map(|(_, gap, _)| gap.len()).sum();
    assert_eq!(long.missing_values(), gap_total);

    let table = normalize_stations(&long, &fx.config.normalize);
    assert_eq!(table.series.len(), 4);

    let mut bounds = Vec::new();
    for (idx, (station, gap, spike_hour)) in DAMAGE.iter().enumerate() {
        let series = table.station(station).unwrap();
        assert_eq!(series.len(), DAYS * 24);
        assert!(series.values.iter().all(|v| v.is_some()), "{}: hole left", station);

        let repair = table.repairs.iter().find(|r| r.station == *station).unwrap();
        assert_eq!(repair.interpolated, gap.len(), "{}", station);
        assert_eq!(repair.filled, 0, "{}", station);
        assert!(repair.clipped >= 1, "{}: nothing clipped", station);

        // grid hour h sits at offset h: the grid starts at 03-01 01:00
        for h in gap {
            let v = series.values[*h].unwrap();
            let (a, b) = (base_value(idx, gap[0] - 1), base_value(idx, gap[2] + 1));
            assert!(v >= a.min(b) && v <= a.max(b), "{}: hour {} = {}", station, h, v);
        }

        let spike = base_value(idx, *spike_hour) * 10.0;
        let (lo, hi) = repair.clip_bounds.unwrap();
        assert!(hi < spike, "{}: upper bound {} keeps spike {}", station, hi, spike);
        assert!(series.values[*spike_hour].unwrap() <= hi);
        assert!(
            series.values.iter().flatten().all(|v| *v >= lo && *v <= hi),
            "{}: value outside [{}, {}]",
            station,
            lo,
            hi
        );
        bounds.push((lo, hi));
    }
    // each station is clipped against its own distribution
    assert!(bounds[0] != bounds[1] && bounds[1] != bounds[2]);

    let untouched = table.repairs.iter().find(|r| r.station == "종로구").unwrap();
    assert_eq!(untouched.interpolated, 0);
}

// ---------------------------------------------------------------------------
// Matrix shape and split
// ---------------------------------------------------------------------------

#[test]
fn test_prepared_matrices_have_expected_shape() {
    let fx = fixture();
    let layout = &fx.config.source.layout;
    let pm10 = load_wide_directory(&fx.config.source.pm10_dir, layout).unwrap();
    let pm25 = load_wide_directory(&fx.config.source.pm25_dir, layout).unwrap();
    let out = prepare_from_tables(&pm10, &pm25, &fx.config).unwrap();

    // 종로구 has no PM2.5 and drops out at the merge
    assert_eq!(out.report.merged_stations, 3);
    assert_eq!(out.report.feature_rows, 3 * DAYS * 24);

    // per station: 96 rows - 48 lag warm-up - 1 unlabeled tail
    let per_station = DAYS * 24 - 48 - 1;
    assert_eq!(out.split.labeled_rows(), 3 * per_station);
    // ranks 1/47..37/47 fall at or below 0.8
    assert_eq!(out.split.x_train.len(), 3 * 37);
    assert_eq!(out.split.x_test.len(), 3 * 10);

    let cols = &out.split.x_train.columns;
    // calendar + derived + 3 stations + nan + 2 networks + nan
    assert_eq!(cols.len(), 3 + 22 + 4 + 3);
    for expected in ["hour", "pm25_roll_std_24", "측정소명_중구", "측정소명_nan", "측정망_도로변대기", "측정망_nan"] {
        assert!(cols.iter().any(|c| c == expected), "missing column {}", expected);
    }
    assert!(!cols.iter().any(|c| c == "pm10" || c == "pm25" || c == "지점ID"));
    assert_eq!(out.split.y_train.columns, vec!["y_pm10", "y_pm25"]);

    for row in out.split.x_train.rows.iter().chain(&out.split.x_test.rows) {
        assert_eq!(row.len(), cols.len());
        assert!(row.iter().all(|v| v.is_finite()));
    }
    for row in out.split.y_train.rows.iter().chain(&out.split.y_test.rows) {
        assert!(row.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_no_station_tests_on_hours_before_it_trains() {
    let fx = fixture();
    let layout = &fx.config.source.layout;
    let pm10 = load_wide_directory(&fx.config.source.pm10_dir, layout).unwrap();
    let pm25 = load_wide_directory(&fx.config.source.pm25_dir, layout).unwrap();
    let out = prepare_from_tables(&pm10, &pm25, &fx.config).unwrap();

    for station in ["강남구", "마포구", "중구"] {
        let last_train = out
            .split
            .train_keys
            .iter()
            .filter(|k| k.station == station)
            .map(|k| k.timestamp)
            .max()
            .unwrap();
        let first_test = out
            .split
            .test_keys
            .iter()
            .filter(|k| k.station == station)
            .map(|k| k.timestamp)
            .min()
            .unwrap();
        assert!(last_train < first_test, "{}: test precedes train", station);
    }
}

// ---------------------------------------------------------------------------
// Full run with outputs
// ---------------------------------------------------------------------------

#[test]
fn test_run_exports_matrices_and_report() {
    let mut fx = fixture();
    let out_dir = fx.root.path().join("out");
    let report_path = fx.root.path().join("report.json");
    fx.config.output.export_dir = Some(out_dir.clone());
    fx.config.output.report_path = Some(report_path.clone());

    let out = run(&fx.config).unwrap();

    for name in ["X_train.csv", "X_test.csv", "Y_train.csv", "Y_test.csv"] {
        assert!(out_dir.join(name).is_file(), "{} not written", name);
    }
    let x_train = fs::read_to_string(out_dir.join("X_train.csv")).unwrap();
    assert_eq!(x_train.lines().count(), 1 + out.split.x_train.len());
    assert!(x_train.starts_with("hour,dow,month,pm10_lag_1"));

    assert_eq!(out.report.metrics.len(), 2);
    assert!(out.report.metrics.iter().all(|m| m.mae.is_some() && m.n == 30));

    let saved = load_report(&report_path).unwrap();
    assert_eq!(saved.train_rows, out.split.x_train.len());
    assert_eq!(saved.ingest.len(), 2);
    assert_eq!(saved.ingest[0].files_read, 2);
}

#[test]
fn test_missing_source_directory_is_an_error() {
    let mut fx = fixture();
    fx.config.source.pm25_dir = fx.root.path().join("does-not-exist");
    assert!(run(&fx.config).is_err());
}
