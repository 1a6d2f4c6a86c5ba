use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::assemble::Assembler;
use crate::catalog::SchemaCatalog;
use crate::coerce::Coercer;
use crate::config::RunConfig;
use crate::error::EngineError;
use crate::model::{CanonicalRecord, Issue, RawBatch, RowOutcome};
use crate::report::{ReportBuilder, RunReport};

/// Canonical records in source row order, every issue raised, and the report.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub records: Vec<CanonicalRecord>,
    pub issues: Vec<Issue>,
    pub report: RunReport,
}

impl RunOutput {
    pub fn valid_records(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.records.iter().filter(|r| r.valid)
    }
}

/// Convert every row of `batch` against the frozen catalog.
pub fn run(catalog: &SchemaCatalog, batch: &RawBatch, config: &RunConfig) -> RunOutput {
    run_with_cancel(catalog, batch, config, &AtomicBool::new(false))
}

/// Like [`run`], stopping at the next row boundary once `cancel` is set.
/// Rows converted before that point are returned and reported.
pub fn run_with_cancel(
    catalog: &SchemaCatalog,
    batch: &RawBatch,
    config: &RunConfig,
    cancel: &AtomicBool,
) -> RunOutput {
    let coercer = Coercer::new(config);
    let assembler = Assembler::new(catalog, &coercer, &batch.header);

    for column in assembler.resolution().unmatched() {
        log::warn!("unmapped column '{column}'");
    }

    let convert = |idx: usize| -> Option<RowOutcome> {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        batch.record(idx).map(|raw| assembler.assemble(&raw))
    };

    let mut outcomes: Vec<RowOutcome> = if config.parallel {
        (0..batch.len()).into_par_iter().filter_map(convert).collect()
    } else {
        (0..batch.len()).map_while(convert).collect()
    };

    // Parallel workers may skip arbitrary rows after cancellation
    outcomes.sort_by_key(|o| o.record.row);

    let mut builder = ReportBuilder::new(catalog.name());
    for outcome in &outcomes {
        builder.record(outcome);
    }
    if outcomes.len() < batch.len() {
        builder.mark_cancelled();
    }
    let report = builder.finish();

    log::info!(
        "converted {}/{} rows: {} valid, {} invalid, {} coercion failures",
        report.rows,
        batch.len(),
        report.valid_records,
        report.invalid_records,
        report.total_failures()
    );

    let mut records = Vec::with_capacity(outcomes.len());
    let mut issues = Vec::new();
    for outcome in outcomes {
        records.push(outcome.record);
        issues.extend(outcome.issues);
    }

    RunOutput {
        records,
        issues,
        report,
    }
}

// ---------------------------------------------------------------------------
// CSV in / out
// ---------------------------------------------------------------------------

/// Read CSV text into a batch. Rows may be shorter or longer than the header.
pub fn read_csv_batch(csv_data: &str) -> Result<RawBatch, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut batch = RawBatch::new(header);
    for record in reader.records() {
        let record = record?;
        batch.push_row(record.iter().map(|v| v.to_string()).collect());
    }
    Ok(batch)
}

pub fn read_csv_path(path: &Path) -> Result<RawBatch, EngineError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Io(format!("cannot read {}: {e}", path.display())))?;
    read_csv_batch(&data)
}

/// Write records in catalog column order plus a trailing `valid` column.
/// Absent values are empty cells.
pub fn write_records_csv<W: Write>(
    catalog: &SchemaCatalog,
    records: &[CanonicalRecord],
    out: W,
) -> Result<(), EngineError> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header: Vec<&str> = catalog.fields().iter().map(|f| f.name()).collect();
    header.push("valid");
    writer.write_record(&header)?;

    for record in records {
        let mut row: Vec<String> = record
            .values
            .iter()
            .map(|(_, v)| v.as_ref().map(|v| v.to_string()).unwrap_or_default())
            .collect();
        row.push(record.valid.to_string());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_records_json<W: Write>(records: &[CanonicalRecord], out: W) -> Result<(), EngineError> {
    serde_json::to_writer_pretty(out, records).map_err(|e| EngineError::Io(e.to_string()))
}
