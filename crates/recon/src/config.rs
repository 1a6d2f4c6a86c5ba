use serde::Deserialize;

use crate::error::EngineError;

/// Tokens that survey spreadsheets use for "no data".
pub const DEFAULT_NA_VALUES: &[&str] = &["UNK", "Unk", "-", "#REF!"];

/// Accepted datetime layouts, tried in order. Two-digit years come before
/// four-digit ones so `6/5/21` is not read as year 21.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M %p",
];

// ---------------------------------------------------------------------------
// Run config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Convert rows on the rayon pool.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default = "default_na_values")]
    pub na_values: Vec<String>,
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
}

fn default_parallel() -> bool {
    true
}

fn default_na_values() -> Vec<String> {
    DEFAULT_NA_VALUES.iter().map(|s| s.to_string()).collect()
}

fn default_date_formats() -> Vec<String> {
    DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            na_values: default_na_values(),
            date_formats: default_date_formats(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl RunConfig {
    pub fn from_toml(input: &str) -> Result<Self, EngineError> {
        let config: RunConfig =
            toml::from_str(input).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.date_formats.is_empty() {
            return Err(EngineError::Config(
                "at least one date format is required".into(),
            ));
        }

        if self.na_values.iter().any(|v| v.trim().is_empty()) {
            return Err(EngineError::Config("na_values must not contain blanks".into()));
        }

        for fmt in &self.date_formats {
            if !fmt.contains('%') {
                return Err(EngineError::Config(format!(
                    "date format '{fmt}' has no chrono specifiers"
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
