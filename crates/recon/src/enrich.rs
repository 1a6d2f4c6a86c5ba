use std::io::Write;

use serde::Serialize;

use crate::catalog::{Activity, Material, SchemaCatalog};
use crate::error::EngineError;
use crate::model::{CanonicalRecord, EnrichedValue};

/// Field → classification row for downstream aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrosswalkEntry {
    pub field: String,
    pub material: Material,
    pub activity: Activity,
}

/// Tag every populated debris field of `record`.
///
/// `record` must come from `catalog`: values are paired with field
/// definitions by position. Metadata fields (NA on both axes) are skipped.
pub fn enrich(catalog: &SchemaCatalog, record: &CanonicalRecord) -> Vec<EnrichedValue> {
    catalog
        .fields()
        .iter()
        .zip(&record.values)
        .filter(|(def, _)| def.is_tagged())
        .filter_map(|(def, (name, value))| {
            debug_assert_eq!(def.name(), name.as_ref());
            value.as_ref().map(|v| EnrichedValue {
                field: def.name().to_string(),
                value: v.clone(),
                material: def.material(),
                activity: def.activity(),
            })
        })
        .collect()
}

/// Classification of every tagged field, in catalog order.
pub fn crosswalk(catalog: &SchemaCatalog) -> Vec<CrosswalkEntry> {
    catalog
        .fields()
        .iter()
        .filter(|f| f.is_tagged())
        .map(|f| CrosswalkEntry {
            field: f.name().to_string(),
            material: f.material(),
            activity: f.activity(),
        })
        .collect()
}

/// Write the crosswalk as `field,material,activity` CSV.
pub fn write_crosswalk_csv<W: Write>(catalog: &SchemaCatalog, out: W) -> Result<(), EngineError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["field", "material", "activity"])?;
    for entry in crosswalk(catalog) {
        writer.write_record([
            entry.field.as_str(),
            entry.material.as_str(),
            entry.activity.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
