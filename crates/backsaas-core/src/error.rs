use std::fmt;

/// Errors that occur while loading or inspecting schema documents.
///
/// All variants carry enough context to produce actionable error messages.
/// Uses `String` for external error details to maintain `Clone` + `Eq`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    /// The schema document could not be read from disk.
    Io { path: String, message: String },
    /// The schema document is not valid YAML/JSON.
    Parse { message: String },
    /// An entity referenced by name does not exist in the schema.
    UnknownEntity { entity: String },
    /// A property carries a `type` value outside the supported set.
    UnknownPropertyType { property: String, declared: String },
    /// The schema failed validation; the report carries the details.
    Invalid { issues: Vec<String> },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "failed to read schema '{path}': {message}")
            }
            Self::Parse { message } => {
                write!(f, "failed to parse schema document: {message}")
            }
            Self::UnknownEntity { entity } => {
                write!(f, "entity '{entity}' is not defined in the schema")
            }
            Self::UnknownPropertyType { property, declared } => {
                write!(
                    f,
                    "property '{property}' declares unsupported type '{declared}'"
                )
            }
            Self::Invalid { issues } => {
                write!(f, "schema validation failed: {}", issues.join("; "))
            }
        }
    }
}

impl std::error::Error for SchemaError {}
