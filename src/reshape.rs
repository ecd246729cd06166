//! Wide-to-long reshaping.
//!
//! Unpivots each (date, station) wide row into one reading per hour-slot
//! column present in its source file; absent slot columns produce nothing.
//! Slot `N` is hour `N` of its date, except slot 24 which is hour 0 of the
//! following day. Values equal to the missing sentinel, blank, or not
//! numeric become `None`; nothing at the cell level can fail.

use crate::logging::{self, Stage};
use crate::model::{LongReading, LongTable, MetaRecord, Pollutant, StationMetadata, WideTable};
use crate::schema::SourceLayout;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Parses a raw reading cell.
pub fn parse_value(raw: &str, sentinel: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == sentinel {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a date cell with the first matching format.
///
/// A cell carrying a time part ("2024-03-01 00:00:00") is accepted by
/// parsing its leading date token.
pub fn parse_date(raw: &str, formats: &[String]) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let candidates = [trimmed, trimmed.split_whitespace().next().unwrap_or("")];
    candidates.iter().find_map(|text| {
        formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
    })
}

/// Timestamp for `slot` (1..=24) on `date`, rolling slot 24 into the next day.
pub fn slot_timestamp(date: NaiveDate, slot: u32) -> NaiveDateTime {
    let (day, hour) = if slot >= 24 {
        (date + Duration::days(1), 0)
    } else {
        (date, slot)
    };
    day.and_time(NaiveTime::MIN) + Duration::hours(hour as i64)
}

/// Reshapes one pollutant's wide table into a long table sorted by
/// (station, timestamp).
pub fn wide_to_long(wide: &WideTable, pollutant: Pollutant, layout: &SourceLayout) -> LongTable {
    let mut table = LongTable::empty(pollutant);
    table.meta_columns = wide.meta_columns.clone();

    for row in &wide.rows {
        let Some(date) = parse_date(&row.date, &layout.date_formats) else {
            table.skipped_rows += 1;
            logging::warn(
                Stage::Reshape,
                Some(&row.station),
                &format!("unparseable date '{}'; row skipped", row.date),
            );
            continue;
        };

        let record = table.records.len();
        table.records.push(MetaRecord {
            date,
            station: row.station.clone(),
            meta: row.meta.clone(),
        });

        for (idx, cell) in row.slots.iter().enumerate() {
            // slot column absent from the source file: nothing was observed
            let Some(raw) = cell.as_deref() else {
                continue;
            };
            let timestamp = slot_timestamp(date, idx as u32 + 1);
            let value = parse_value(raw, &layout.missing_sentinel);
            table.readings.push(LongReading {
                station: row.station.clone(),
                timestamp,
                hour: timestamp.hour(),
                value,
                record,
            });
        }
    }

    // stable: readings from the same (station, timestamp) keep source order
    table
        .readings
        .sort_by(|a, b| a.station.cmp(&b.station).then(a.timestamp.cmp(&b.timestamp)));

    logging::info(
        Stage::Reshape,
        None,
        &format!(
            "{}: {} wide rows -> {} readings ({} missing, {} rows skipped)",
            pollutant,
            wide.rows.len(),
            table.readings.len(),
            table.missing_values(),
            table.skipped_rows
        ),
    );
    table
}

/// One metadata record per station: the record behind the station's
/// earliest reading.
pub fn station_metadata(long: &LongTable) -> StationMetadata {
    let mut out = StationMetadata::new();
    for reading in &long.readings {
        if out.contains_key(&reading.station) {
            continue;
        }
        if let Some(record) = long.record_of(reading) {
            out.insert(reading.station.clone(), record.clone());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
