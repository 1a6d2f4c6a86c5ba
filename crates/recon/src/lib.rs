//! `shoreline-recon`: schema reconciliation engine for beach-cleanup surveys.
//!
//! Pure engine crate: takes a column catalog plus raw survey rows whose
//! headers drift from year to year, returns canonical typed records tagged
//! with material/activity and a run report. No CLI dependencies.

pub mod assemble;
pub mod catalog;
pub mod coerce;
pub mod config;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod model;
pub mod report;
pub mod resolver;
pub mod sites;

pub use assemble::{assemble, Assembler};
pub use catalog::{CatalogVersion, DerivedRule, FieldDefinition, SchemaCatalog};
pub use config::RunConfig;
pub use engine::{run, run_with_cancel, RunOutput};
pub use error::{EngineError, SchemaError};
pub use model::{CanonicalRecord, CoercionKind, Issue, RawBatch, RawRecord, Value};
pub use report::RunReport;
pub use sites::{SiteRule, SiteTable};
