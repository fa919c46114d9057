use std::collections::HashMap;
use std::fmt;

use crate::schema::{PropertyType, Schema, FUNCTION_KINDS};

/// System columns the storage layer adds implicitly. A schema may declare
/// any of these itself, in which case the declaration wins and the system
/// does not re-add the column.
pub const SYSTEM_COLUMNS: &[&str] = &["tenant_id", "created_at", "updated_at"];

/// SQL keywords that can never be used as entity or property names.
/// Identifiers land verbatim in DDL and query text, so these are rejected
/// outright rather than quoted.
const RESERVED_WORDS: &[&str] = &[
    "select", "insert", "update", "delete", "from", "where", "table", "index",
    "order", "group", "join", "union", "primary", "references", "constraint",
    "user", "grant", "drop", "alter",
];

// ---------------------------------------------------------------------------
// ValidationIssue
// ---------------------------------------------------------------------------

/// One problem found while validating a schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationIssue {
    /// `version` is missing or zero; versions are monotone starting at 1.
    MissingVersion,
    /// `service.name` is empty.
    MissingServiceName,
    /// The schema declares no entities.
    NoEntities,
    /// An entity does not name a key property.
    EntityMissingKey { entity: String },
    /// The entity's key property is absent from `properties`.
    KeyNotInProperties { entity: String, key: String },
    /// `schema.type` of an entity is not `object`.
    NotObjectSchema { entity: String, declared: String },
    /// A name listed in `required` has no property definition.
    RequiredUnknownProperty { entity: String, property: String },
    /// A property declares a type outside the supported set.
    UnknownPropertyType {
        entity: String,
        property: String,
        declared: String,
    },
    /// An entity or property name is not a valid lowercase identifier.
    InvalidIdentifier { entity: String, name: String },
    /// A property name collides with a SQL reserved word.
    ReservedPropertyName { entity: String, property: String },
    /// Two entities differ only in letter case.
    DuplicateEntityName { first: String, second: String },
    /// A function declares a kind outside {validation, hook, computed, workflow}.
    UnknownFunctionKind { function: String, declared: String },
    /// A function trigger references an entity the schema does not define.
    FunctionUnknownEntity { function: String, entity: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVersion => write!(f, "schema version must be >= 1"),
            Self::MissingServiceName => write!(f, "service.name must not be empty"),
            Self::NoEntities => write!(f, "schema must declare at least one entity"),
            Self::EntityMissingKey { entity } => {
                write!(f, "entity '{entity}' does not declare a key property")
            }
            Self::KeyNotInProperties { entity, key } => {
                write!(
                    f,
                    "entity '{entity}': key property '{key}' is absent from properties"
                )
            }
            Self::NotObjectSchema { entity, declared } => {
                write!(
                    f,
                    "entity '{entity}': schema.type must be 'object', got '{declared}'"
                )
            }
            Self::RequiredUnknownProperty { entity, property } => {
                write!(
                    f,
                    "entity '{entity}': required property '{property}' is not defined"
                )
            }
            Self::UnknownPropertyType {
                entity,
                property,
                declared,
            } => {
                write!(
                    f,
                    "entity '{entity}': property '{property}' declares unsupported type '{declared}'"
                )
            }
            Self::InvalidIdentifier { entity, name } => {
                write!(
                    f,
                    "entity '{entity}': name '{name}' must match [a-z][a-z0-9_]*"
                )
            }
            Self::ReservedPropertyName { entity, property } => {
                write!(
                    f,
                    "entity '{entity}': property name '{property}' is a reserved word"
                )
            }
            Self::DuplicateEntityName { first, second } => {
                write!(
                    f,
                    "entities '{first}' and '{second}' differ only in letter case"
                )
            }
            Self::UnknownFunctionKind { function, declared } => {
                write!(
                    f,
                    "function '{function}' declares unknown type '{declared}'"
                )
            }
            Self::FunctionUnknownEntity { function, entity } => {
                write!(
                    f,
                    "function '{function}' targets unknown entity '{entity}'"
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

/// The aggregated outcome of validating one schema document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Returns true if no issues were found.
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns the issues found, in discovery order.
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Renders every issue as a message string.
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }
}

/// Returns true if `name` is a valid lowercase identifier. Identifiers are
/// interpolated into SQL text, so the grammar is strict.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Validates a parsed schema document, reporting every inconsistency that
/// would produce a broken API or storage layout.
///
/// Property and entity names are case-sensitive, but two entities differing
/// only in case are rejected because they would collide at the store.
pub fn validate(schema: &Schema) -> ValidationReport {
    let mut issues = Vec::new();

    if schema.version == 0 {
        issues.push(ValidationIssue::MissingVersion);
    }
    if schema.service.name.is_empty() {
        issues.push(ValidationIssue::MissingServiceName);
    }
    if schema.entities.is_empty() {
        issues.push(ValidationIssue::NoEntities);
    }

    // Case-insensitive duplicate detection across case-sensitive names.
    let mut lowered: HashMap<String, &str> = HashMap::new();
    for name in schema.entities.keys() {
        if let Some(first) = lowered.insert(name.to_lowercase(), name) {
            issues.push(ValidationIssue::DuplicateEntityName {
                first: first.to_string(),
                second: name.clone(),
            });
        }
    }

    for (entity_name, entity) in &schema.entities {
        if !is_identifier(entity_name) {
            issues.push(ValidationIssue::InvalidIdentifier {
                entity: entity_name.clone(),
                name: entity_name.clone(),
            });
        }

        if !entity.schema.kind.is_empty() && entity.schema.kind != "object" {
            issues.push(ValidationIssue::NotObjectSchema {
                entity: entity_name.clone(),
                declared: entity.schema.kind.clone(),
            });
        }

        if entity.key.is_empty() {
            issues.push(ValidationIssue::EntityMissingKey {
                entity: entity_name.clone(),
            });
        } else if !entity.declares(&entity.key) {
            issues.push(ValidationIssue::KeyNotInProperties {
                entity: entity_name.clone(),
                key: entity.key.clone(),
            });
        }

        for required in &entity.schema.required {
            if !entity.declares(required) {
                issues.push(ValidationIssue::RequiredUnknownProperty {
                    entity: entity_name.clone(),
                    property: required.clone(),
                });
            }
        }

        for (prop_name, def) in &entity.schema.properties {
            if !is_identifier(prop_name) {
                issues.push(ValidationIssue::InvalidIdentifier {
                    entity: entity_name.clone(),
                    name: prop_name.clone(),
                });
            }
            // Declaring a system column is the documented override and is
            // allowed; plain SQL keywords never are.
            if RESERVED_WORDS.contains(&prop_name.as_str()) {
                issues.push(ValidationIssue::ReservedPropertyName {
                    entity: entity_name.clone(),
                    property: prop_name.clone(),
                });
            }
            if PropertyType::parse(&def.declared_type).is_none() {
                issues.push(ValidationIssue::UnknownPropertyType {
                    entity: entity_name.clone(),
                    property: prop_name.clone(),
                    declared: def.declared_type.clone(),
                });
            }
        }
    }

    for (fn_name, spec) in &schema.functions {
        if !FUNCTION_KINDS.contains(&spec.kind.as_str()) {
            issues.push(ValidationIssue::UnknownFunctionKind {
                function: fn_name.clone(),
                declared: spec.kind.clone(),
            });
        }
        if let Some(trigger) = &spec.trigger {
            // Trigger strings are "<entity>.<trigger-point>".
            if let Some((entity, _)) = trigger.split_once('.') {
                if !schema.entities.contains_key(entity) {
                    issues.push(ValidationIssue::FunctionUnknownEntity {
                        function: fn_name.clone(),
                        entity: entity.to_string(),
                    });
                }
            }
        }
    }

    ValidationReport { issues }
}
