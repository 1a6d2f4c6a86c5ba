use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::SchemaError;
use crate::sites::{SiteRule, SiteTable};

const LEGACY_CATALOG: &str = include_str!("../catalogs/legacy.toml");
const EXTENDED_CATALOG: &str = include_str!("../catalogs/extended.toml");

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldType {
    Datetime,
    #[default]
    Int,
    Float,
    Str,
}

impl FieldType {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "datetime" => Some(Self::Datetime),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "str" => Some(Self::Str),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Datetime => "datetime",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Material {
    Metal,
    Plastic,
    Glass,
    Wood,
    Cloth,
    Mixed,
    #[default]
    NA,
}

impl Material {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "metal" => Some(Self::Metal),
            "plastic" => Some(Self::Plastic),
            "glass" => Some(Self::Glass),
            "wood" => Some(Self::Wood),
            "cloth" => Some(Self::Cloth),
            "mixed" => Some(Self::Mixed),
            "na" => Some(Self::NA),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metal => "Metal",
            Self::Plastic => "Plastic",
            Self::Glass => "Glass",
            Self::Wood => "Wood",
            Self::Cloth => "Cloth",
            Self::Mixed => "Mixed",
            Self::NA => "NA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Activity {
    Various,
    DumpingDisaster,
    Recreation,
    Hygiene,
    EatingDrinking,
    Smoking,
    Fishing,
    #[default]
    NA,
}

impl Activity {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "various" => Some(Self::Various),
            "dumping/disaster" => Some(Self::DumpingDisaster),
            "recreation" => Some(Self::Recreation),
            "hygiene" => Some(Self::Hygiene),
            "eating/drinking" => Some(Self::EatingDrinking),
            "smoking" => Some(Self::Smoking),
            "fishing" => Some(Self::Fishing),
            "na" => Some(Self::NA),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Various => "Various",
            Self::DumpingDisaster => "Dumping/Disaster",
            Self::Recreation => "Recreation",
            Self::Hygiene => "Hygiene",
            Self::EatingDrinking => "Eating/Drinking",
            Self::Smoking => "Smoking",
            Self::Fishing => "Fishing",
            Self::NA => "NA",
        }
    }
}

/// How several differing non-empty source values for one field are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Value from the earliest-ranked alias.
    #[default]
    First,
    /// Value from the latest-ranked alias.
    Last,
    /// Numeric sum of every source value.
    Sum,
}

impl MergePolicy {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "first" => Some(Self::First),
            "last" => Some(Self::Last),
            "sum" => Some(Self::Sum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Last => "last",
            Self::Sum => "sum",
        }
    }
}

macro_rules! token_display {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    )*};
}

token_display!(FieldType, Material, Activity, MergePolicy);

// ---------------------------------------------------------------------------
// Field definition
// ---------------------------------------------------------------------------

/// One canonical output column and everything needed to fill it.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    name: Arc<str>,
    /// Declared spellings, canonical name first.
    aliases: Vec<String>,
    field_type: FieldType,
    required: bool,
    material: Material,
    activity: Activity,
    merge: MergePolicy,
    site: bool,
    collects_unmapped: bool,
}

impl FieldDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Aliases in declared order. Index 0 is the canonical name.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn material(&self) -> Material {
        self.material
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn merge(&self) -> MergePolicy {
        self.merge
    }

    /// Values are standardized through the catalog's site table.
    pub fn is_site(&self) -> bool {
        self.site
    }

    /// True for the catch-all field that sums unmapped numeric columns.
    pub fn collects_unmapped(&self) -> bool {
        self.collects_unmapped
    }

    /// Debris item fields carry a classification on at least one axis.
    pub fn is_tagged(&self) -> bool {
        self.material != Material::NA || self.activity != Activity::NA
    }
}

// ---------------------------------------------------------------------------
// Catalog document
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    other_field: Option<String>,
    #[serde(default, rename = "field")]
    fields: Vec<FieldEntry>,
    #[serde(default)]
    derived: Vec<DerivedEntry>,
    #[serde(default, rename = "site")]
    sites: Vec<SiteEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldEntry {
    name: String,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default, rename = "type")]
    field_type: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    material: Option<String>,
    #[serde(default)]
    activity: Option<String>,
    #[serde(default)]
    merge: Option<String>,
    #[serde(default)]
    site: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DerivedEntry {
    field: String,
    column: String,
    #[serde(default)]
    per: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SiteEntry {
    name: String,
    keys: Vec<String>,
}

/// Fills a float field from a raw column that no alias claims, optionally
/// divided by another field of the same row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedRule {
    field: usize,
    column: String,
    per: Option<usize>,
}

impl DerivedRule {
    /// Index of the target field.
    pub fn field(&self) -> usize {
        self.field
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Index of the divisor field. Absent or zero divisors count as 1.
    pub fn per(&self) -> Option<usize> {
        self.per
    }
}

/// Shipped catalog variants. Independent versions, not a migration chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogVersion {
    /// Bottle caps merged into one field, no activity axis.
    Legacy,
    /// Bottle caps split by material, with activity tags.
    Extended,
}

/// Trim, collapse internal whitespace, case-fold.
pub fn normalize_alias(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Frozen set of field definitions with a normalized alias index.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    name: Option<String>,
    fields: Vec<FieldDefinition>,
    /// normalized alias -> (field index, alias rank)
    alias_index: HashMap<String, (usize, usize)>,
    other_field: Option<usize>,
    derived: Vec<DerivedRule>,
    /// normalized column -> rule index
    derived_index: HashMap<String, usize>,
    sites: SiteTable,
}

impl SchemaCatalog {
    /// Parse and validate a TOML catalog document.
    pub fn load(definition: &str) -> Result<Self, SchemaError> {
        let doc: CatalogDocument =
            toml::from_str(definition).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::build(doc)
    }

    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::Io(format!("{}: {e}", path.display())))?;
        Self::load(&text)
    }

    pub fn bundled(version: CatalogVersion) -> Result<Self, SchemaError> {
        match version {
            CatalogVersion::Legacy => Self::load(LEGACY_CATALOG),
            CatalogVersion::Extended => Self::load(EXTENDED_CATALOG),
        }
    }

    fn build(doc: CatalogDocument) -> Result<Self, SchemaError> {
        if doc.fields.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut catalog = SchemaCatalog {
            name: doc.name,
            fields: Vec::with_capacity(doc.fields.len() + 1),
            alias_index: HashMap::new(),
            other_field: None,
            derived: Vec::new(),
            derived_index: HashMap::new(),
            sites: SiteTable::default(),
        };
        let mut names: HashMap<String, usize> = HashMap::new();

        for entry in doc.fields {
            let field = parse_entry(entry)?;
            catalog.insert(field, &mut names)?;
        }

        if let Some(other) = doc.other_field {
            let field = FieldDefinition {
                name: Arc::from(other.trim()),
                aliases: vec![other.trim().to_string()],
                field_type: FieldType::Float,
                required: false,
                material: Material::Mixed,
                activity: Activity::Various,
                merge: MergePolicy::Sum,
                site: false,
                collects_unmapped: true,
            };
            catalog.insert(field, &mut names)?;
            catalog.other_field = Some(catalog.fields.len() - 1);
        }

        for entry in doc.derived {
            catalog.insert_derived(entry)?;
        }

        let rules = doc
            .sites
            .into_iter()
            .map(|s| SiteRule::new(&s.name, s.keys))
            .collect::<Result<Vec<_>, _>>()?;
        catalog.sites = SiteTable::new(rules);

        log::info!(
            "catalog '{}' loaded: {} fields, {} aliases",
            catalog.name.as_deref().unwrap_or("unnamed"),
            catalog.fields.len(),
            catalog.alias_index.len()
        );
        Ok(catalog)
    }

    fn insert(
        &mut self,
        mut field: FieldDefinition,
        names: &mut HashMap<String, usize>,
    ) -> Result<(), SchemaError> {
        let idx = self.fields.len();
        let key = normalize_alias(&field.name);
        if key.is_empty() {
            return Err(SchemaError::EmptyName {
                field: field.name.to_string(),
            });
        }
        if names.insert(key, idx).is_some() {
            return Err(SchemaError::DuplicateField(field.name.to_string()));
        }

        // Collapse repeats within one field, keeping first position.
        let mut kept = Vec::with_capacity(field.aliases.len());
        for alias in field.aliases.drain(..) {
            let norm = normalize_alias(&alias);
            if norm.is_empty() {
                return Err(SchemaError::EmptyName {
                    field: field.name.to_string(),
                });
            }
            match self.alias_index.get(&norm) {
                Some(&(owner, _)) if owner == idx => continue,
                Some(&(owner, _)) => {
                    return Err(SchemaError::DuplicateAlias {
                        alias: alias.trim().to_string(),
                        first: self.fields[owner].name.to_string(),
                        second: field.name.to_string(),
                    });
                }
                None => {
                    self.alias_index.insert(norm, (idx, kept.len()));
                    kept.push(alias.trim().to_string());
                }
            }
        }
        field.aliases = kept;
        self.fields.push(field);
        Ok(())
    }

    fn insert_derived(&mut self, entry: DerivedEntry) -> Result<(), SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidDerived {
            field: entry.field.trim().to_string(),
            reason: reason.to_string(),
        };

        let field = self
            .field_index(&entry.field)
            .ok_or_else(|| invalid("no such field"))?;
        let target = &self.fields[field];
        if target.field_type != FieldType::Float || target.collects_unmapped {
            return Err(invalid("target must be a float field"));
        }

        let per = match &entry.per {
            Some(name) => {
                let idx = self
                    .field_index(name)
                    .ok_or_else(|| invalid(&format!("no divisor field '{}'", name.trim())))?;
                if !self.fields[idx].field_type.is_numeric() {
                    return Err(invalid("divisor must be numeric"));
                }
                Some(idx)
            }
            None => None,
        };

        let norm = normalize_alias(&entry.column);
        if norm.is_empty() {
            return Err(invalid("column is empty"));
        }
        let owner = match (self.alias_index.get(&norm), self.derived_index.get(&norm)) {
            (Some(&(owner, _)), _) => Some(owner),
            (None, Some(&rule)) => Some(self.derived[rule].field),
            (None, None) => None,
        };
        if let Some(owner) = owner {
            return Err(SchemaError::DuplicateAlias {
                alias: entry.column.trim().to_string(),
                first: self.fields[owner].name.to_string(),
                second: self.fields[field].name.to_string(),
            });
        }

        self.derived_index.insert(norm, self.derived.len());
        self.derived.push(DerivedRule {
            field,
            column: entry.column.trim().to_string(),
            per,
        });
        Ok(())
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        let key = normalize_alias(name);
        self.fields.iter().position(|f| normalize_alias(&f.name) == key)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Fields in declared order.
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn alias_count(&self) -> usize {
        self.alias_index.len()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.lookup_by_alias(name)
            .filter(|f| normalize_alias(&f.name) == normalize_alias(name))
    }

    pub fn lookup_by_alias(&self, name: &str) -> Option<&FieldDefinition> {
        self.lookup_index(name).map(|(idx, _)| &self.fields[idx])
    }

    /// (field index, alias rank) for a raw column name.
    pub(crate) fn lookup_index(&self, name: &str) -> Option<(usize, usize)> {
        self.alias_index.get(&normalize_alias(name)).copied()
    }

    /// Index of the catch-all field for unmapped numeric columns, if declared.
    pub fn other_field(&self) -> Option<usize> {
        self.other_field
    }

    pub fn derived(&self) -> &[DerivedRule] {
        &self.derived
    }

    /// Rule index for a raw column claimed by a `[[derived]]` rule.
    pub(crate) fn lookup_derived(&self, name: &str) -> Option<usize> {
        self.derived_index.get(&normalize_alias(name)).copied()
    }

    pub fn sites(&self) -> &SiteTable {
        &self.sites
    }

    /// Only the extended variant classifies items by activity.
    pub fn has_activity_axis(&self) -> bool {
        self.fields
            .iter()
            .any(|f| !f.collects_unmapped && f.activity != Activity::NA)
    }
}

fn parse_entry(entry: FieldEntry) -> Result<FieldDefinition, SchemaError> {
    let name = entry.name.trim().to_string();

    let field_type = match entry.field_type {
        Some(token) => FieldType::parse(&token).ok_or_else(|| SchemaError::UnknownType {
            field: name.clone(),
            token,
        })?,
        None => FieldType::default(),
    };
    let material = match entry.material {
        Some(token) => Material::parse(&token).ok_or_else(|| SchemaError::UnknownMaterial {
            field: name.clone(),
            token,
        })?,
        None => Material::default(),
    };
    let activity = match entry.activity {
        Some(token) => Activity::parse(&token).ok_or_else(|| SchemaError::UnknownActivity {
            field: name.clone(),
            token,
        })?,
        None => Activity::default(),
    };
    let merge = match entry.merge {
        Some(token) => MergePolicy::parse(&token).ok_or_else(|| SchemaError::UnknownMerge {
            field: name.clone(),
            token,
        })?,
        None => MergePolicy::default(),
    };

    if merge == MergePolicy::Sum && !field_type.is_numeric() {
        return Err(SchemaError::InvalidMerge {
            field: name,
            reason: format!("cannot sum columns of type {field_type}"),
        });
    }
    if entry.site && field_type != FieldType::Str {
        return Err(SchemaError::InvalidSite {
            name,
            reason: format!("site standardization needs a str field, not {field_type}"),
        });
    }

    let mut aliases = Vec::with_capacity(entry.sources.len() + 1);
    aliases.push(name.clone());
    aliases.extend(entry.sources);

    Ok(FieldDefinition {
        name: Arc::from(name.as_str()),
        aliases,
        field_type,
        required: entry.required,
        material,
        activity,
        merge,
        site: entry.site,
        collects_unmapped: false,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
