use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};

use crate::catalog::{FieldDefinition, FieldType};
use crate::config::RunConfig;
use crate::model::{CoercionKind, Value};

/// Converts raw cell text into typed values.
#[derive(Debug, Clone)]
pub struct Coercer {
    na_values: Vec<String>,
    date_formats: Vec<DateFormat>,
}

#[derive(Debug, Clone)]
struct DateFormat {
    pattern: String,
    has_time: bool,
}

impl DateFormat {
    fn new(pattern: &str) -> Self {
        let has_time = ["%H", "%I", "%M", "%S", "%T", "%R", "%p"]
            .iter()
            .any(|spec| pattern.contains(spec));
        Self {
            pattern: pattern.to_string(),
            has_time,
        }
    }
}

impl Default for Coercer {
    fn default() -> Self {
        Self::new(&RunConfig::default())
    }
}

impl Coercer {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            na_values: config.na_values.iter().map(|v| v.trim().to_string()).collect(),
            date_formats: config.date_formats.iter().map(|f| DateFormat::new(f)).collect(),
        }
    }

    /// Whitespace-only text and NA tokens carry no value.
    pub fn is_blank(&self, raw: &str) -> bool {
        let s = raw.trim();
        s.is_empty() || self.na_values.iter().any(|na| na == s)
    }

    /// Coerce a cell for `field`. Blank cells are absent, or `MissingRequired`
    /// when the field is required.
    pub fn coerce(
        &self,
        raw: &str,
        field: &FieldDefinition,
    ) -> Result<Option<Value>, CoercionKind> {
        match self.parse(raw, field.field_type())? {
            None if field.required() => Err(CoercionKind::MissingRequired),
            other => Ok(other),
        }
    }

    /// Type-only conversion with no required-field semantics.
    pub fn parse(&self, raw: &str, ty: FieldType) -> Result<Option<Value>, CoercionKind> {
        if self.is_blank(raw) {
            return Ok(None);
        }
        let s = raw.trim();
        let value = match ty {
            FieldType::Datetime => self.parse_datetime(s).ok_or(CoercionKind::BadDate)?,
            FieldType::Int => Value::Int(parse_int(s).ok_or(CoercionKind::BadNumber)?),
            FieldType::Float => Value::Float(parse_float(s).ok_or(CoercionKind::BadNumber)?),
            FieldType::Str => Value::Str(s.to_string()),
        };
        Ok(Some(value))
    }

    /// First matching format wins.
    pub fn parse_datetime(&self, s: &str) -> Option<Value> {
        self.date_formats.iter().find_map(|fmt| {
            if fmt.has_time {
                NaiveDateTime::parse_from_str(s, &fmt.pattern)
                    .ok()
                    .map(Value::DateTime)
            } else {
                NaiveDate::parse_from_str(s, &fmt.pattern).ok().map(Value::Date)
            }
        })
    }
}

/// Coerce with the default NA tokens and date formats.
pub fn coerce(raw: &str, field: &FieldDefinition) -> Result<Option<Value>, CoercionKind> {
    static DEFAULT: OnceLock<Coercer> = OnceLock::new();
    DEFAULT.get_or_init(Coercer::default).coerce(raw, field)
}

/// Integer with optional thousands separators and an all-zero fraction.
pub fn parse_int(s: &str) -> Option<i64> {
    let cleaned = strip_thousands(s.trim())?;
    match cleaned.split_once('.') {
        Some((whole, frac)) if !frac.is_empty() && frac.chars().all(|c| c == '0') => {
            whole.parse::<i64>().ok()
        }
        Some(_) => None,
        None => cleaned.parse::<i64>().ok(),
    }
}

/// Finite float with thousands separators and percent signs removed.
pub fn parse_float(s: &str) -> Option<f64> {
    let cleaned = s.trim().replace('%', "");
    strip_thousands(cleaned.trim())?
        .parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
}

/// Drop `,` separators. `None` unless every group after the leading one is
/// exactly three digits wide.
fn strip_thousands(s: &str) -> Option<String> {
    if !s.contains(',') {
        return Some(s.to_string());
    }
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if frac.contains(',') {
        return None;
    }
    let digits = whole.strip_prefix(['-', '+']).unwrap_or(whole);
    let mut groups = digits.split(',');
    let lead = groups.next()?;
    if lead.is_empty() || lead.len() > 3 || groups.any(|g| g.len() != 3) {
        return None;
    }
    Some(s.replace(',', ""))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
