/// Wide-table CSV loader
///
/// Reads every `.csv` file in a pollutant directory into one `WideTable`.
/// Each file is a daily air-quality export with one row per (date, station)
/// and one column per hour slot:
///
/// ```text
/// date,측정망,측정소명,1시,2시,...,24시,지점ID,지점
/// 2024-03-01,도시대기,중구,31,-,28,...,25,111121,서울 중구
/// ```
///
/// Cells are decoded lossily as UTF-8 so a stray byte never aborts a load;
/// the only file-level failure is a header without the date or station
/// column.

use crate::logging::{self, Stage};
use crate::model::{PipelineError, WideRow, WideTable};
use crate::schema::SourceLayout;
use csv::{ByteRecord, ReaderBuilder};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

// ============================================================================
// Directory Loading
// ============================================================================

/// Lists the `.csv` files of `dir`, sorted by file name.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let path = entry.path();
        let is_csv = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".csv"))
            .unwrap_or(false);
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Loads and concatenates every CSV file in `dir`.
///
/// A directory without CSV files yields an empty table.
pub fn load_wide_directory(dir: &Path, layout: &SourceLayout) -> Result<WideTable, PipelineError> {
    let files = list_csv_files(dir)?;
    if files.is_empty() {
        logging::warn(
            Stage::Ingest,
            None,
            &format!("no .csv files found in {}", dir.display()),
        );
        return Ok(WideTable::default());
    }

    let mut table = WideTable::default();
    for path in &files {
        let file = fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let part = load_wide_reader(file, &path.display().to_string(), layout)?;
        logging::debug(
            Stage::Ingest,
            None,
            &format!("{}: {} rows", path.display(), part.rows.len()),
        );
        append(&mut table, part);
    }

    logging::info(
        Stage::Ingest,
        None,
        &format!(
            "Loaded {} rows from {} files in {}",
            table.rows.len(),
            table.files_read,
            dir.display()
        ),
    );
    Ok(table)
}

fn append(table: &mut WideTable, part: WideTable) {
    for col in part.meta_columns {
        if !table.meta_columns.contains(&col) {
            table.meta_columns.push(col);
        }
    }
    table.rows.extend(part.rows);
    table.files_read += part.files_read;
}

// ============================================================================
// Single Source Parsing
// ============================================================================

/// Parses one CSV source. `source_name` is used in error messages only.
pub fn load_wide_reader<R: Read>(
    reader: R,
    source_name: &str,
    layout: &SourceLayout,
) -> Result<WideTable, PipelineError> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .byte_headers()
        .map_err(|e| PipelineError::csv(source_name, e))?
        .iter()
        .map(|h| decode(h).trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    // A file with no header at all is treated as empty rather than malformed.
    if headers.is_empty() || (headers.len() == 1 && headers[0].is_empty()) {
        return Ok(WideTable {
            files_read: 1,
            ..WideTable::default()
        });
    }

    let resolved = layout.resolve(&headers, source_name)?;
    if resolved.slot_count() == 0 {
        logging::warn(
            Stage::Ingest,
            None,
            &format!("{} has no hour-slot columns; it contributes no readings", source_name),
        );
    }

    let meta_columns: Vec<String> = resolved.meta.iter().map(|(name, _)| name.clone()).collect();
    let mut rows = Vec::new();
    let mut record = ByteRecord::new();
    loop {
        let more = csv_reader
            .read_byte_record(&mut record)
            .map_err(|e| PipelineError::csv(source_name, e))?;
        if !more {
            break;
        }
        if record.iter().all(|f| f.iter().all(|b| b.is_ascii_whitespace())) {
            continue;
        }

        let cell = |idx: usize| record.get(idx).map(decode).unwrap_or_default();
        let meta: BTreeMap<String, String> = resolved
            .meta
            .iter()
            .map(|(name, idx)| (name.clone(), cell(*idx).trim().to_string()))
            .collect();
        let slots = resolved
            .slots
            .iter()
            .map(|idx| idx.map(|i| cell(i)))
            .collect();

        rows.push(WideRow {
            date: cell(resolved.date).trim().to_string(),
            station: cell(resolved.station).trim().to_string(),
            meta,
            slots,
        });
    }

    Ok(WideTable {
        meta_columns,
        rows,
        files_read: 1,
    })
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// ============================================================================
// Tests
// ============================================================================
