use std::collections::BTreeMap;
use std::io::Write;

use serde::Serialize;

use crate::error::EngineError;
use crate::model::{Issue, RowOutcome};

/// Run-level issue statistics. Always produced, however noisy the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    pub rows: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    /// Run stopped early; counts cover converted rows only.
    pub cancelled: bool,
    /// Raw column → number of rows it appeared in without a matching field.
    pub unmapped_columns: BTreeMap<String, usize>,
    /// Field → failure kind → count.
    pub coercion_failures: BTreeMap<String, BTreeMap<String, usize>>,
    pub failures_by_kind: BTreeMap<String, usize>,
    pub ambiguous_sources: BTreeMap<String, usize>,
}

impl RunReport {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a RowOutcome>) -> Self {
        let mut builder = ReportBuilder::default();
        for outcome in outcomes {
            builder.record(outcome);
        }
        builder.finish()
    }

    /// Unmapped columns, most frequent first. Candidates for new aliases.
    pub fn top_unmapped(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut cols: Vec<(&str, usize)> = self
            .unmapped_columns
            .iter()
            .map(|(c, n)| (c.as_str(), *n))
            .collect();
        cols.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        cols.truncate(limit);
        cols
    }

    pub fn total_failures(&self) -> usize {
        self.failures_by_kind.values().sum()
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Io(e.to_string()))
    }

    pub fn write_json<W: Write>(&self, out: W) -> Result<(), EngineError> {
        serde_json::to_writer_pretty(out, self).map_err(|e| EngineError::Io(e.to_string()))
    }
}

/// Accumulates row outcomes into a `RunReport`.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    report: RunReport,
}

impl ReportBuilder {
    pub fn new(catalog: Option<&str>) -> Self {
        Self {
            report: RunReport {
                catalog: catalog.map(str::to_string),
                ..RunReport::default()
            },
        }
    }

    pub fn record(&mut self, outcome: &RowOutcome) {
        let r = &mut self.report;
        r.rows += 1;
        if outcome.record.valid {
            r.valid_records += 1;
        } else {
            r.invalid_records += 1;
        }

        for issue in &outcome.issues {
            match issue {
                Issue::Coercion { field, error, .. } => {
                    *r.coercion_failures
                        .entry(field.clone())
                        .or_default()
                        .entry(error.to_string())
                        .or_insert(0) += 1;
                    *r.failures_by_kind.entry(error.to_string()).or_insert(0) += 1;
                }
                Issue::UnmappedColumn { column, .. } => {
                    *r.unmapped_columns.entry(column.clone()).or_insert(0) += 1;
                }
                Issue::AmbiguousSource { field, .. } => {
                    *r.ambiguous_sources.entry(field.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.report.cancelled = true;
    }

    pub fn finish(self) -> RunReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalRecord, CoercionKind};

    fn outcome(row: usize, valid: bool, issues: Vec<Issue>) -> RowOutcome {
        RowOutcome {
            record: CanonicalRecord {
                row,
                values: Vec::new(),
                valid,
                enriched: Vec::new(),
            },
            issues,
        }
    }

    fn unmapped(row: usize, column: &str) -> Issue {
        Issue::UnmappedColumn {
            row,
            column: column.into(),
        }
    }

    fn failure(row: usize, field: &str, error: CoercionKind, required: bool) -> Issue {
        Issue::Coercion {
            row,
            field: field.into(),
            error,
            value: "x".into(),
            required,
        }
    }

    #[test]
    fn report_counts() {
        let outcomes = vec![
            outcome(0, true, vec![unmapped(0, "Weather Notes"), unmapped(0, "Surfboards")]),
            outcome(
                1,
                false,
                vec![
                    unmapped(1, "Weather Notes"),
                    failure(1, "Date", CoercionKind::BadDate, true),
                    failure(1, "Straws", CoercionKind::BadNumber, false),
                ],
            ),
            outcome(
                2,
                false,
                vec![failure(2, "Duration (Hrs)", CoercionKind::MissingRequired, true)],
            ),
        ];
        let report = RunReport::from_outcomes(&outcomes);

        assert_eq!(report.rows, 3);
        assert_eq!(report.valid_records, 1);
        assert_eq!(report.invalid_records, 2);
        assert_eq!(report.unmapped_columns["Weather Notes"], 2);
        assert_eq!(report.top_unmapped(1), vec![("Weather Notes", 2)]);
        assert_eq!(report.coercion_failures["Date"]["bad_date"], 1);
        assert_eq!(report.failures_by_kind["bad_number"], 1);
        assert_eq!(report.failures_by_kind["missing_required"], 1);
        assert_eq!(report.total_failures(), 3);
        assert!(!report.cancelled);
    }

    #[test]
    fn empty_run_still_reports() {
        let report = ReportBuilder::new(Some("extended")).finish();
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["catalog"], "extended");
        assert_eq!(json["rows"], 0);
        assert!(json["unmapped_columns"].as_object().unwrap().is_empty());
    }

    #[test]
    fn write_json_matches_to_json() {
        let report = RunReport::from_outcomes(&[outcome(
            0,
            false,
            vec![failure(0, "Date", CoercionKind::BadDate, true)],
        )]);
        let mut buf = Vec::new();
        report.write_json(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), report.to_json().unwrap());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["coercion_failures"]["Date"]["bad_date"], 1);
        assert_eq!(json["invalid_records"], 1);
        assert!(json.get("catalog").is_none());
    }
}
