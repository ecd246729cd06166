/// Column layouts for the pipeline's tables.
///
/// Two explicit descriptors live here so that no stage has to infer column
/// roles from names at runtime:
///
/// - `SourceLayout` enumerates the columns of a raw wide CSV: the identity
///   columns (date, station), the fixed hour-slot columns `1시`..`24시`, and
///   everything else as metadata. It is resolved against each file's header
///   once, at load time.
/// - `FeatureSchema` assigns every column of the feature table a role
///   (identity, numeric, categorical, target, excluded). It is built once per
///   run and drives matrix construction.

use crate::model::{PipelineError, Pollutant};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Source layout
// ---------------------------------------------------------------------------

/// Maximum number of hour-slot columns in a wide row.
pub const MAX_HOUR_SLOTS: u32 = 24;

/// Calendar feature columns, in matrix order.
pub const CALENDAR_COLUMNS: [&str; 3] = ["hour", "dow", "month"];

/// Name of the timestamp column in every derived table.
pub const TIMESTAMP_COLUMN: &str = "datetime";

/// Declared layout of a raw wide CSV file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLayout {
    pub date_column: String,
    pub station_column: String,
    /// Station classification column (measuring network).
    pub network_column: String,
    /// Unit appended to the slot number in hour-slot headers, e.g. "시" in "13시".
    pub hour_suffix: String,
    /// Number of hour-slot columns, slots `1..=hour_slots`.
    pub hour_slots: u32,
    /// Cell text marking a missing reading.
    pub missing_sentinel: String,
    /// `chrono` formats tried in order when parsing the date column.
    pub date_formats: Vec<String>,
}

impl Default for SourceLayout {
    fn default() -> Self {
        SourceLayout {
            date_column: "date".to_string(),
            station_column: "측정소명".to_string(),
            network_column: "측정망".to_string(),
            hour_suffix: "시".to_string(),
            hour_slots: MAX_HOUR_SLOTS,
            missing_sentinel: "-".to_string(),
            date_formats: vec![
                "%Y-%m-%d".to_string(),
                "%Y/%m/%d".to_string(),
                "%Y.%m.%d".to_string(),
                "%Y%m%d".to_string(),
            ],
        }
    }
}

impl SourceLayout {
    /// Header label of hour slot `slot` (1-based).
    pub fn slot_label(&self, slot: u32) -> String {
        format!("{}{}", slot, self.hour_suffix)
    }

    /// Slot number for a header label, accepting zero-padded numbers ("01시").
    pub fn slot_of(&self, label: &str) -> Option<u32> {
        let digits = label.trim().strip_suffix(self.hour_suffix.as_str())?;
        if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let slot: u32 = digits.parse().ok()?;
        (1..=self.hour_slots).contains(&slot).then_some(slot)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.date_column.trim().is_empty() || self.station_column.trim().is_empty() {
            return Err(PipelineError::Config(
                "source date_column and station_column must be non-empty".to_string(),
            ));
        }
        if self.date_column == self.station_column {
            return Err(PipelineError::Config(
                "source date_column and station_column must differ".to_string(),
            ));
        }
        if !(1..=MAX_HOUR_SLOTS).contains(&self.hour_slots) {
            return Err(PipelineError::Config(format!(
                "hour_slots must be within 1..={}, got {}",
                MAX_HOUR_SLOTS, self.hour_slots
            )));
        }
        if self.hour_suffix.is_empty() {
            return Err(PipelineError::Config("hour_suffix must be non-empty".to_string()));
        }
        if self.date_formats.is_empty() {
            return Err(PipelineError::Config(
                "at least one date format is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves this layout against one file's header row.
    ///
    /// Fails only when an identity column is absent; missing hour slots are
    /// tolerated and read as "no value".
    pub fn resolve(&self, headers: &[String], path: &str) -> Result<HeaderLayout, PipelineError> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let date = find(&self.date_column).ok_or_else(|| PipelineError::MissingColumn {
            path: path.to_string(),
            column: self.date_column.clone(),
        })?;
        let station = find(&self.station_column).ok_or_else(|| PipelineError::MissingColumn {
            path: path.to_string(),
            column: self.station_column.clone(),
        })?;

        let mut slots = vec![None; self.hour_slots as usize];
        let mut meta = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == date || idx == station {
                continue;
            }
            match self.slot_of(header) {
                Some(slot) => slots[(slot - 1) as usize] = Some(idx),
                None => meta.push((header.clone(), idx)),
            }
        }

        Ok(HeaderLayout {
            date,
            station,
            slots,
            meta,
        })
    }
}

/// A `SourceLayout` resolved to column indices of one concrete file.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderLayout {
    pub date: usize,
    pub station: usize,
    /// Column index per slot, index 0 = slot 1.
    pub slots: Vec<Option<usize>>,
    /// Metadata columns (name, index) in header order.
    pub meta: Vec<(String, usize)>,
}

impl HeaderLayout {
    pub fn slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

// ---------------------------------------------------------------------------
// Feature schema
// ---------------------------------------------------------------------------

/// Role a column plays in the supervised matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnRole {
    /// Row key only (timestamp).
    Identity,
    /// Copied into X as a float.
    Numeric,
    /// One-hot encoded into X, with a reserved missing category.
    Categorical,
    /// Label column of Y.
    Target,
    /// Present in the feature table but kept out of X.
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub role: ColumnRole,
}

/// Column name → role descriptor for the feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub station_column: String,
    pub columns: Vec<ColumnSpec>,
}

impl FeatureSchema {
    /// Builds the descriptor for a feature table.
    ///
    /// Current pollutant values are excluded from X; only their lagged and
    /// rolled derivatives are features. Metadata columns are excluded unless
    /// listed as categorical or numeric.
    pub fn build(
        station_column: &str,
        derived_columns: &[String],
        meta_columns: &[String],
        categorical: &[String],
        numeric_meta: &[String],
    ) -> Result<Self, PipelineError> {
        if let Some(col) = categorical.iter().find(|c| numeric_meta.contains(c)) {
            return Err(PipelineError::Config(format!(
                "column '{}' cannot be both categorical and numeric",
                col
            )));
        }

        let mut columns = Vec::new();
        let mut push = |name: &str, role: ColumnRole| {
            if !columns.iter().any(|c: &ColumnSpec| c.name == name) {
                columns.push(ColumnSpec {
                    name: name.to_string(),
                    role,
                });
            }
        };

        let station_role = if categorical.iter().any(|c| c == station_column) {
            ColumnRole::Categorical
        } else {
            ColumnRole::Identity
        };
        push(station_column, station_role);
        push(TIMESTAMP_COLUMN, ColumnRole::Identity);
        for pollutant in Pollutant::ALL {
            push(pollutant.column(), ColumnRole::Excluded);
        }
        for name in CALENDAR_COLUMNS {
            push(name, ColumnRole::Numeric);
        }
        for name in derived_columns {
            push(name, ColumnRole::Numeric);
        }
        for name in numeric_meta {
            push(name, ColumnRole::Numeric);
        }
        for name in categorical {
            push(name, ColumnRole::Categorical);
        }
        for name in meta_columns {
            push(name, ColumnRole::Excluded);
        }
        for pollutant in Pollutant::ALL {
            push(pollutant.target_column(), ColumnRole::Target);
        }

        Ok(FeatureSchema {
            station_column: station_column.to_string(),
            columns,
        })
    }

    fn with_role(&self, role: ColumnRole) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.role == role)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn numeric_columns(&self) -> Vec<&str> {
        self.with_role(ColumnRole::Numeric)
    }

    pub fn categorical_columns(&self) -> Vec<&str> {
        self.with_role(ColumnRole::Categorical)
    }

    pub fn target_columns(&self) -> Vec<&str> {
        self.with_role(ColumnRole::Target)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_slot_label_and_slot_of_agree() {
        let layout = SourceLayout::default();
        assert_eq!(layout.slot_label(1), "1시");
        assert_eq!(layout.slot_label(24), "24시");
        for slot in 1..=layout.hour_slots {
            assert_eq!(layout.slot_of(&layout.slot_label(slot)), Some(slot));
        }
    }

    #[test]
    fn test_slot_of_accepts_only_the_fixed_pattern() {
        let layout = SourceLayout::default();
        assert_eq!(layout.slot_of("7시"), Some(7));
        assert_eq!(layout.slot_of("07시"), Some(7));
        assert_eq!(layout.slot_of("24시"), Some(24));
        assert_eq!(layout.slot_of("0시"), None);
        assert_eq!(layout.slot_of("25시"), None);
        assert_eq!(layout.slot_of("100시"), None);
        assert_eq!(layout.slot_of("시"), None);
        assert_eq!(layout.slot_of("측정소명"), None);
        assert_eq!(layout.slot_of("7"), None);
    }

    #[test]
    fn test_resolve_splits_identity_slots_and_meta() {
        let layout = SourceLayout::default();
        let hdr = headers(&["date", "측정망", "측정소명", "1시", "2시", "24시", "지점ID"]);
        let resolved = layout.resolve(&hdr, "x.csv").expect("identity columns present");
        assert_eq!(resolved.date, 0);
        assert_eq!(resolved.station, 2);
        assert_eq!(resolved.slots[0], Some(3));
        assert_eq!(resolved.slots[1], Some(4));
        assert_eq!(resolved.slots[23], Some(5));
        assert_eq!(resolved.slot_count(), 3);
        assert_eq!(
            resolved.meta,
            vec![("측정망".to_string(), 1), ("지점ID".to_string(), 6)]
        );
    }

    #[test]
    fn test_resolve_fails_without_station_column() {
        let layout = SourceLayout::default();
        let hdr = headers(&["date", "1시"]);
        let err = layout.resolve(&hdr, "x.csv").unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { ref column, .. } if column == "측정소명"));
    }

    #[test]
    fn test_validate_rejects_slot_count_out_of_range() {
        let mut layout = SourceLayout::default();
        layout.hour_slots = 0;
        assert!(layout.validate().is_err());
        layout.hour_slots = 25;
        assert!(layout.validate().is_err());
        layout.hour_slots = 24;
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn test_feature_schema_roles() {
        let derived = vec!["pm10_lag_1".to_string(), "pm25_roll_mean_3".to_string()];
        let meta = vec!["측정망".to_string(), "지점".to_string()];
        let categorical = vec!["측정소명".to_string(), "측정망".to_string()];
        let schema = FeatureSchema::build("측정소명", &derived, &meta, &categorical, &[])
            .expect("valid schema");

        let role = |name: &str| schema.columns.iter().find(|c| c.name == name).map(|c| c.role);
        assert_eq!(role("측정소명"), Some(ColumnRole::Categorical));
        assert_eq!(role("측정망"), Some(ColumnRole::Categorical));
        assert_eq!(role("지점"), Some(ColumnRole::Excluded));
        assert_eq!(role("pm10"), Some(ColumnRole::Excluded));
        assert_eq!(role("datetime"), Some(ColumnRole::Identity));
        assert_eq!(role("y_pm25"), Some(ColumnRole::Target));
        assert_eq!(
            schema.numeric_columns(),
            vec!["hour", "dow", "month", "pm10_lag_1", "pm25_roll_mean_3"]
        );
        assert_eq!(schema.categorical_columns(), vec!["측정소명", "측정망"]);
        assert_eq!(schema.target_columns(), vec!["y_pm10", "y_pm25"]);
    }

    #[test]
    fn test_feature_schema_rejects_conflicting_roles() {
        let cols = vec!["지점ID".to_string()];
        let result = FeatureSchema::build("측정소명", &[], &cols, &cols, &cols);
        assert!(result.is_err());
    }
}
