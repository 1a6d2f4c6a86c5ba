use std::fmt;

/// Fatal catalog problems. Raised before any row is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// TOML parse / deserialization error.
    Parse(String),
    /// Catalog declares no fields.
    Empty,
    /// Field name or alias is blank after normalization.
    EmptyName { field: String },
    /// Two fields share a canonical name.
    DuplicateField(String),
    /// A normalized alias is claimed by two fields.
    DuplicateAlias { alias: String, first: String, second: String },
    UnknownType { field: String, token: String },
    UnknownMaterial { field: String, token: String },
    UnknownActivity { field: String, token: String },
    UnknownMerge { field: String, token: String },
    /// Merge policy not applicable to the field's type.
    InvalidMerge { field: String, reason: String },
    /// `[[derived]]` rule targets or divides by an unusable field.
    InvalidDerived { field: String, reason: String },
    /// Bad `[[site]]` entry, or a site flag on a non-text field.
    InvalidSite { name: String, reason: String },
    /// IO error reading a catalog file.
    Io(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "catalog parse error: {msg}"),
            Self::Empty => write!(f, "catalog declares no fields"),
            Self::EmptyName { field } => {
                write!(f, "field '{field}': name or alias is empty")
            }
            Self::DuplicateField(name) => write!(f, "duplicate canonical field '{name}'"),
            Self::DuplicateAlias { alias, first, second } => {
                write!(f, "alias '{alias}' claimed by both '{first}' and '{second}'")
            }
            Self::UnknownType { field, token } => {
                write!(f, "field '{field}': unknown type '{token}'")
            }
            Self::UnknownMaterial { field, token } => {
                write!(f, "field '{field}': unknown material '{token}'")
            }
            Self::UnknownActivity { field, token } => {
                write!(f, "field '{field}': unknown activity '{token}'")
            }
            Self::UnknownMerge { field, token } => {
                write!(f, "field '{field}': unknown merge policy '{token}'")
            }
            Self::InvalidMerge { field, reason } => {
                write!(f, "field '{field}': {reason}")
            }
            Self::InvalidDerived { field, reason } => {
                write!(f, "derived rule for '{field}': {reason}")
            }
            Self::InvalidSite { name, reason } => write!(f, "site '{name}': {reason}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Run-level failures outside of per-row coercion.
#[derive(Debug)]
pub enum EngineError {
    Schema(SchemaError),
    /// Run configuration parse / validation error.
    Config(String),
    /// Malformed CSV input or output failure.
    Csv(String),
    Io(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(e) => write!(f, "{e}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Csv(msg) => write!(f, "CSV error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Schema(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SchemaError> for EngineError {
    fn from(e: SchemaError) -> Self {
        Self::Schema(e)
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
