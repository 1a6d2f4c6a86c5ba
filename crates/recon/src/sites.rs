//! Cleanup-site name standardization.
//!
//! Survey forms let volunteers type the site freely, so one beach shows up
//! under many spellings across years. A fixed normalization pass evens out
//! case, punctuation and the common San Lorenzo River variants; the
//! catalog's `[[site]]` table then folds known spellings onto one name.

use crate::error::SchemaError;

/// Rewrites applied in order after case and punctuation normalization.
const RIVER_REWRITES: &[(&str, &str)] = &[
    ("Slr", "SLR"),
    ("Sl River -", "SLR @"),
    ("San Lorenzo River", "SLR"),
    ("San Lorenzo R", "SLR"),
    ("SLR:", "SLR @"),
    ("SLR-", "SLR @"),
    ("SLR At", "SLR @"),
    ("SLR -", "SLR @"),
    ("SLR Cleanup", "SLR"),
];

/// Whole words removed anywhere but the start of the name.
const DROPPED_WORDS: &[&str] = &["Street", "Ave"];

/// Any site containing one of `keys` is renamed to `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRule {
    name: String,
    keys: Vec<String>,
}

impl SiteRule {
    pub fn new(name: &str, keys: Vec<String>) -> Result<Self, SchemaError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchemaError::InvalidSite {
                name: name.to_string(),
                reason: "name is empty".into(),
            });
        }
        if keys.is_empty() || keys.iter().any(|k| k.trim().is_empty()) {
            return Err(SchemaError::InvalidSite {
                name: name.to_string(),
                reason: "needs at least one non-empty key".into(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            keys,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Ordered rename table. Later rules see the output of earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteTable {
    rules: Vec<SiteRule>,
}

impl SiteTable {
    pub fn new(rules: Vec<SiteRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[SiteRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Normalize `raw`, then apply the rename table.
    pub fn standardize(&self, raw: &str) -> String {
        let mut site = normalize_site(raw);
        for rule in &self.rules {
            for key in &rule.keys {
                if site.contains(key.as_str()) {
                    site = rule.name.clone();
                }
            }
        }
        site
    }
}

/// Fixed normalization pass, without the rename table.
pub fn normalize_site(raw: &str) -> String {
    let titled = title_case(raw.trim()).replace('.', "").replace(" To ", " - ");

    let mut site = titled
        .split(' ')
        .enumerate()
        .filter(|(i, word)| *i == 0 || !DROPPED_WORDS.contains(word))
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ");

    for (from, to) in RIVER_REWRITES {
        site = site.replace(from, to);
    }
    site.trim().to_string()
}

/// Upper-case the first letter of each alphabetic run, lower-case the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if in_word {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        in_word = c.is_alphabetic();
    }
    out
}
