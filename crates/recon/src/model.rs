use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::catalog::{Activity, Material};

pub const DATE_DISPLAY: &str = "%Y-%m-%d";
pub const DATETIME_DISPLAY: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One raw survey row: cells keyed by the column name used in its batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Position in the source batch, used to correlate issues.
    pub row: usize,
    pub cells: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(row: usize) -> Self {
        Self {
            row,
            cells: Vec::new(),
        }
    }

    pub fn from_pairs<K, V>(row: usize, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            row,
            cells: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.cells.push((column.into(), value.into()));
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }
}

/// Rows sharing one header, e.g. a single yearly extract.
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawBatch {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row `idx` as a keyed record. Short rows yield empty trailing cells.
    pub fn record(&self, idx: usize) -> Option<RawRecord> {
        let row = self.rows.get(idx)?;
        let cells = self
            .header
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), row.get(i).cloned().unwrap_or_default()))
            .collect();
        Some(RawRecord { row: idx, cells })
    }
}

// ---------------------------------------------------------------------------
// Typed values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            Self::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }
}

/// Display form. Parsing it back with the field's type yields an equal value.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(d) => write!(f, "{}", d.format(DATE_DISPLAY)),
            Self::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_DISPLAY)),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            _ => serializer.collect_str(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// A populated debris field with its classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedValue {
    pub field: String,
    pub value: Value,
    pub material: Material,
    pub activity: Activity,
}

/// One row in the canonical schema, columns in catalog order.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub row: usize,
    pub values: Vec<(Arc<str>, Option<Value>)>,
    pub valid: bool,
    pub enriched: Vec<EnrichedValue>,
}

impl CanonicalRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name.as_ref() == field)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn enriched(&self, field: &str) -> Option<&EnrichedValue> {
        self.enriched.iter().find(|e| e.field == field)
    }

    /// Number of populated columns.
    pub fn populated(&self) -> usize {
        self.values.iter().filter(|(_, v)| v.is_some()).count()
    }
}

impl Serialize for CanonicalRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 2))?;
        map.serialize_entry("row", &self.row)?;
        map.serialize_entry("valid", &self.valid)?;
        for (name, value) in &self.values {
            map.serialize_entry(name.as_ref(), value)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionKind {
    BadDate,
    BadNumber,
    MissingRequired,
}

impl fmt::Display for CoercionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadDate => write!(f, "bad_date"),
            Self::BadNumber => write!(f, "bad_number"),
            Self::MissingRequired => write!(f, "missing_required"),
        }
    }
}

impl std::error::Error for CoercionKind {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// A cell could not become a typed value.
    Coercion {
        row: usize,
        field: String,
        error: CoercionKind,
        value: String,
        /// Only errors on required fields invalidate the row.
        required: bool,
    },
    /// Column not claimed by any field.
    UnmappedColumn { row: usize, column: String },
    /// Several differing source values for one field.
    AmbiguousSource {
        row: usize,
        field: String,
        /// Alias whose value was kept.
        chosen: String,
        candidates: Vec<(String, String)>,
    },
}

impl Issue {
    pub fn row(&self) -> usize {
        match self {
            Self::Coercion { row, .. }
            | Self::UnmappedColumn { row, .. }
            | Self::AmbiguousSource { row, .. } => *row,
        }
    }

    /// Field name, or the raw column name for unmapped columns.
    pub fn subject(&self) -> &str {
        match self {
            Self::Coercion { field, .. } | Self::AmbiguousSource { field, .. } => field,
            Self::UnmappedColumn { column, .. } => column,
        }
    }

    pub fn invalidates_row(&self) -> bool {
        matches!(self, Self::Coercion { required: true, .. })
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coercion { row, field, error, value, .. } => {
                write!(f, "row {row}, field '{field}': {error} ('{value}')")
            }
            Self::UnmappedColumn { row, column } => {
                write!(f, "row {row}: unmapped column '{column}'")
            }
            Self::AmbiguousSource { row, field, chosen, candidates } => {
                write!(
                    f,
                    "row {row}, field '{field}': {} differing sources, kept '{chosen}'",
                    candidates.len()
                )
            }
        }
    }
}

/// Result of converting one row.
#[derive(Debug, Clone)]
pub struct RowOutcome {
    pub record: CanonicalRecord,
    pub issues: Vec<Issue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_record_pads_short_rows() {
        let mut batch = RawBatch::new(vec!["Date".into(), "Site".into(), "Cigarettes".into()]);
        batch.push_row(vec!["2021-06-05".into(), "North Beach".into()]);
        let rec = batch.record(0).unwrap();
        assert_eq!(rec.row, 0);
        assert_eq!(rec.get("Site"), Some("North Beach"));
        assert_eq!(rec.get("Cigarettes"), Some(""));
        assert!(batch.record(1).is_none());
    }

    #[test]
    fn value_display_forms() {
        let d = NaiveDate::from_ymd_opt(2021, 6, 5).unwrap();
        assert_eq!(Value::Date(d).to_string(), "2021-06-05");
        let dt = d.and_hms_opt(9, 30, 0).unwrap();
        assert_eq!(Value::DateTime(dt).to_string(), "2021-06-05 09:30:00");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Int(-3).to_string(), "-3");
    }

    #[test]
    fn value_accessors() {
        let d = NaiveDate::from_ymd_opt(2021, 6, 5).unwrap();
        let dt = d.and_hms_opt(9, 30, 0).unwrap();
        assert_eq!(Value::Date(d).as_date(), Some(d));
        assert_eq!(Value::DateTime(dt).as_date(), Some(d));
        assert_eq!(Value::Int(3).as_date(), None);

        assert_eq!(Value::Str("Cowell Beach".into()).as_str(), Some("Cowell Beach"));
        assert_eq!(Value::Float(1.5).as_str(), None);

        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Str("3".into()).as_f64(), None);
    }

    #[test]
    fn issue_serializes_with_kind_tag() {
        let issue = Issue::UnmappedColumn {
            row: 4,
            column: "Weather Notes".into(),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "unmapped_column");
        assert_eq!(json["column"], "Weather Notes");
        assert!(!issue.invalidates_row());
    }
}
