use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

// ---------------------------------------------------------------------------
// PropertyType
// ---------------------------------------------------------------------------

/// The closed set of property types a schema may declare.
///
/// Documents carry the type as a raw string so that an unsupported value
/// surfaces as a validation issue instead of a parse failure; see
/// [`PropertyDefinition::property_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl PropertyType {
    /// Parses a declared type string. Returns `None` for unsupported values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    /// Returns the canonical type name as it appears in schema documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PropertyDefinition
// ---------------------------------------------------------------------------

/// A JSON-schema-like field descriptor.
///
/// Constraint keys the engine understands are modeled explicitly; anything
/// else lands in `extra` and is preserved on round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PropertyDefinition {
    /// Declared type string (`string`, `integer`, ...). Kept raw so the
    /// validator can report unsupported values.
    #[serde(rename = "type", default)]
    pub declared_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertyDefinition>>,
    /// Unrecognized keys, preserved for round-trip fidelity.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PropertyDefinition {
    /// Creates a bare definition of the given type with no constraints.
    pub fn of_type(ty: PropertyType) -> Self {
        Self {
            declared_type: ty.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Returns the parsed property type, or an error naming the property.
    pub fn property_type(&self, property: &str) -> Result<PropertyType, SchemaError> {
        PropertyType::parse(&self.declared_type).ok_or_else(|| SchemaError::UnknownPropertyType {
            property: property.to_string(),
            declared: self.declared_type.clone(),
        })
    }

    /// Returns true if this definition carries a non-null default value.
    pub fn has_default(&self) -> bool {
        matches!(self.default, Some(ref v) if !v.is_null())
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// The `schema` block of an entity: an object shape with required names
/// and a property map.
///
/// Properties are stored in a `BTreeMap` for deterministic iteration,
/// which the column planner relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EntitySchema {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
}

/// One addressable resource type in a tenant's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Entity {
    /// Name of the primary-key property; must appear in `properties`.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub schema: EntitySchema,
}

impl Entity {
    /// Looks up a property definition by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.schema.properties.get(name)
    }

    /// Returns true if `name` is listed in `schema.required`.
    pub fn is_required(&self, name: &str) -> bool {
        self.schema.required.iter().any(|r| r == name)
    }

    /// Returns true if the schema itself declares the given property name.
    pub fn declares(&self, name: &str) -> bool {
        self.schema.properties.contains_key(name)
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// A named lifecycle function declaration from the schema's `functions`
/// section. The `kind` is kept raw so unknown values surface in validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FunctionSpec {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Function kinds recognized by the validator.
pub const FUNCTION_KINDS: &[&str] = &["validation", "hook", "computed", "workflow"];

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Service identity carried by every schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A versioned, declarative description a tenant submits to provision
/// its API.
///
/// Unknown top-level keys are ignored on parse (forward compatibility).
/// Entities are stored in a `BTreeMap` so every traversal of the schema
/// is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schema {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub service: ServiceInfo,
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, FunctionSpec>,
}

impl Schema {
    /// Parses a schema from a YAML string. JSON documents parse too,
    /// since YAML is a superset.
    pub fn from_yaml_str(input: &str) -> Result<Self, SchemaError> {
        serde_yaml::from_str(input).map_err(|e| SchemaError::Parse {
            message: e.to_string(),
        })
    }

    /// Parses a schema from an in-memory JSON value, as stored in the
    /// platform schema registry.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, SchemaError> {
        serde_json::from_value(value).map_err(|e| SchemaError::Parse {
            message: e.to_string(),
        })
    }

    /// Reads and parses a schema document from disk.
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        tracing::debug!(path = %path.display(), "loading schema document");
        let raw = std::fs::read_to_string(path).map_err(|e| SchemaError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Looks up an entity by name.
    pub fn entity(&self, name: &str) -> Result<&Entity, SchemaError> {
        self.entities.get(name).ok_or_else(|| SchemaError::UnknownEntity {
            entity: name.to_string(),
        })
    }

    /// Returns the functions declared with the given kind.
    pub fn functions_of_kind<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a FunctionSpec)> {
        self.functions.iter().filter(move |(_, f)| f.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CRM_YAML: &str = r#"
version: 1
service:
  name: crm
  description: Customer relationship management
entities:
  contacts:
    key: contact_id
    schema:
      type: object
      required: [contact_id, email]
      properties:
        contact_id:
          type: string
        email:
          type: string
          format: email
        first_name:
          type: string
          minLength: 1
          maxLength: 50
        status:
          type: string
          default: lead
functions:
  audit_contact:
    type: hook
    trigger: contacts.after_create
"#;

    #[test]
    fn parses_yaml_document() {
        let schema = Schema::from_yaml_str(CRM_YAML).unwrap();
        assert_eq!(schema.version, 1);
        assert_eq!(schema.service.name, "crm");
        assert_eq!(schema.entities.len(), 1);

        let contacts = schema.entity("contacts").unwrap();
        assert_eq!(contacts.key, "contact_id");
        assert!(contacts.is_required("email"));
        assert!(!contacts.is_required("first_name"));
        assert_eq!(
            contacts.property("email").unwrap().format.as_deref(),
            Some("email")
        );
    }

    #[test]
    fn parses_json_document() {
        let value = serde_json::json!({
            "version": 3,
            "service": {"name": "inventory"},
            "entities": {
                "items": {
                    "key": "sku",
                    "schema": {
                        "type": "object",
                        "properties": {"sku": {"type": "string"}}
                    }
                }
            }
        });
        let schema = Schema::from_json_value(value).unwrap();
        assert_eq!(schema.version, 3);
        assert!(schema.entity("items").is_ok());
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let schema = Schema::from_yaml_str(
            "version: 1\nservice: {name: svc}\nentities: {}\nx_future_key: 42\n",
        )
        .unwrap();
        assert_eq!(schema.version, 1);
    }

    #[test]
    fn unknown_property_keys_round_trip() {
        let yaml = r#"
version: 1
service: {name: svc}
entities:
  things:
    key: id
    schema:
      type: object
      properties:
        id:
          type: string
          x-ui-widget: slider
"#;
        let schema = Schema::from_yaml_str(yaml).unwrap();
        let def = schema.entity("things").unwrap().property("id").unwrap();
        assert_eq!(
            def.extra.get("x-ui-widget"),
            Some(&serde_json::json!("slider"))
        );

        let json = serde_json::to_value(&schema).unwrap();
        let back = Schema::from_json_value(json).unwrap();
        assert_eq!(schema, back);
    }

    #[test]
    fn missing_entity_is_an_error() {
        let schema = Schema::from_yaml_str(CRM_YAML).unwrap();
        assert!(matches!(
            schema.entity("deals"),
            Err(SchemaError::UnknownEntity { entity }) if entity == "deals"
        ));
    }

    #[test]
    fn property_type_parse() {
        assert_eq!(PropertyType::parse("string"), Some(PropertyType::String));
        assert_eq!(PropertyType::parse("integer"), Some(PropertyType::Integer));
        assert_eq!(PropertyType::parse("number"), Some(PropertyType::Number));
        assert_eq!(PropertyType::parse("boolean"), Some(PropertyType::Boolean));
        assert_eq!(PropertyType::parse("array"), Some(PropertyType::Array));
        assert_eq!(PropertyType::parse("object"), Some(PropertyType::Object));
        assert_eq!(PropertyType::parse("uuid"), None);
        assert_eq!(PropertyType::parse("String"), None);
    }

    #[test]
    fn property_type_on_definition() {
        let def = PropertyDefinition::of_type(PropertyType::Integer);
        assert_eq!(
            def.property_type("age").unwrap(),
            PropertyType::Integer
        );

        let bad = PropertyDefinition {
            declared_type: "tuple".into(),
            ..PropertyDefinition::default()
        };
        assert!(matches!(
            bad.property_type("pair"),
            Err(SchemaError::UnknownPropertyType { property, declared })
                if property == "pair" && declared == "tuple"
        ));
    }

    #[test]
    fn has_default_ignores_null() {
        let mut def = PropertyDefinition::of_type(PropertyType::String);
        assert!(!def.has_default());
        def.default = Some(serde_json::Value::Null);
        assert!(!def.has_default());
        def.default = Some(serde_json::json!("lead"));
        assert!(def.has_default());
    }

    #[test]
    fn functions_of_kind_filters() {
        let schema = Schema::from_yaml_str(CRM_YAML).unwrap();
        let hooks: Vec<_> = schema.functions_of_kind("hook").collect();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].0, "audit_contact");
        assert_eq!(schema.functions_of_kind("validation").count(), 0);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crm.yaml");
        std::fs::write(&path, CRM_YAML).unwrap();
        let schema = Schema::from_file(&path).unwrap();
        assert_eq!(schema.service.name, "crm");
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let result = Schema::from_file(Path::new("/nonexistent/schema.yaml"));
        assert!(matches!(result, Err(SchemaError::Io { .. })));
    }
}
