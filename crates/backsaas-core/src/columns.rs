use std::fmt;

use crate::error::SchemaError;
use crate::schema::{Entity, PropertyDefinition, PropertyType};

/// Default width for `format: email` string columns.
const EMAIL_VARCHAR_LEN: u32 = 255;

// ---------------------------------------------------------------------------
// ColumnType
// ---------------------------------------------------------------------------

/// The relational type a property maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Bounded string; `VARCHAR(n)`.
    Varchar(u32),
    /// Unbounded string.
    Text,
    /// 32-bit integer.
    Integer,
    /// Arbitrary-precision numeric.
    Decimal,
    Boolean,
    /// Arrays and objects; JSON-encoded on write, decoded on read.
    Jsonb,
    /// UTC timestamp, microsecond precision.
    TimestampTz,
}

impl ColumnType {
    /// Maps a property definition to its column type.
    pub fn for_property(name: &str, def: &PropertyDefinition) -> Result<Self, SchemaError> {
        let ty = match def.property_type(name)? {
            PropertyType::String => match def.format.as_deref() {
                Some("email") => Self::Varchar(EMAIL_VARCHAR_LEN),
                Some("uri") => Self::Text,
                _ => match def.max_length {
                    Some(n) => Self::Varchar(n),
                    None => Self::Text,
                },
            },
            PropertyType::Integer => Self::Integer,
            PropertyType::Number => Self::Decimal,
            PropertyType::Boolean => Self::Boolean,
            PropertyType::Array | PropertyType::Object => Self::Jsonb,
        };
        Ok(ty)
    }

    /// Renders the SQL type name.
    pub fn sql(&self) -> String {
        match self {
            Self::Varchar(n) => format!("VARCHAR({n})"),
            Self::Text => "TEXT".to_string(),
            Self::Integer => "INTEGER".to_string(),
            Self::Decimal => "DECIMAL".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Jsonb => "JSONB".to_string(),
            Self::TimestampTz => "TIMESTAMPTZ".to_string(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

// ---------------------------------------------------------------------------
// Column / ColumnRole
// ---------------------------------------------------------------------------

/// How the storage layer treats a column, independent of whether the schema
/// declared it or the system added it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// The entity's primary-key property.
    Key,
    /// The tenant scope column; always written from the bound tenant.
    TenantId,
    /// An ordinary data property.
    Data,
    /// Set once on insert, never updated through the API.
    CreatedAt,
    /// Advanced on every successful update.
    UpdatedAt,
}

/// One column of an entity's backing table.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub role: ColumnRole,
    /// True when the schema document declared this property itself
    /// (as opposed to an implicitly added system column).
    pub declared: bool,
    /// Required per the schema, or satisfied by a schema-level default.
    pub required: bool,
    /// Non-null schema default; becomes a DDL column default.
    pub default: Option<serde_json::Value>,
}

/// Returns the role implied by a column name. System-column semantics apply
/// by name even when the schema declares the property itself.
fn role_for(name: &str, key: &str) -> ColumnRole {
    if name == key {
        ColumnRole::Key
    } else {
        match name {
            "tenant_id" => ColumnRole::TenantId,
            "created_at" => ColumnRole::CreatedAt,
            "updated_at" => ColumnRole::UpdatedAt,
            _ => ColumnRole::Data,
        }
    }
}

// ---------------------------------------------------------------------------
// ColumnPlan
// ---------------------------------------------------------------------------

/// The deterministic column layout of one entity's backing table.
///
/// The plan is derived exactly once per entity and its ordered column list
/// is the single source of truth for DDL emission, INSERT column binding,
/// and row decoding. Order: key first, then `tenant_id` (unless declared),
/// then the remaining properties sorted by name, then `created_at` and
/// `updated_at` (each unless declared).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    pub table: String,
    pub key: String,
    pub columns: Vec<Column>,
}

impl ColumnPlan {
    /// Derives the plan for an entity. The entity must already have passed
    /// validation; an unsupported property type still surfaces as an error
    /// rather than a panic.
    pub fn for_entity(name: &str, entity: &Entity) -> Result<Self, SchemaError> {
        let key = entity.key.clone();
        let mut columns = Vec::with_capacity(entity.schema.properties.len() + 3);

        let key_def = entity.property(&key).ok_or_else(|| SchemaError::Invalid {
            issues: vec![format!(
                "entity '{name}': key property '{key}' is absent from properties"
            )],
        })?;
        columns.push(Column {
            name: key.clone(),
            ty: ColumnType::for_property(&key, key_def)?,
            role: ColumnRole::Key,
            declared: true,
            required: true,
            default: None,
        });

        if !entity.declares("tenant_id") {
            columns.push(Column {
                name: "tenant_id".to_string(),
                ty: ColumnType::Text,
                role: ColumnRole::TenantId,
                declared: false,
                required: true,
                default: None,
            });
        }

        // BTreeMap iteration is already sorted by property name.
        for (prop_name, def) in &entity.schema.properties {
            if prop_name == &key {
                continue;
            }
            let default = def.default.clone().filter(|v| !v.is_null());
            columns.push(Column {
                name: prop_name.clone(),
                ty: ColumnType::for_property(prop_name, def)?,
                role: role_for(prop_name, &key),
                declared: true,
                required: entity.is_required(prop_name) && default.is_none(),
                default,
            });
        }

        for ts in ["created_at", "updated_at"] {
            if !entity.declares(ts) {
                columns.push(Column {
                    name: ts.to_string(),
                    ty: ColumnType::TimestampTz,
                    role: role_for(ts, &key),
                    declared: false,
                    required: false,
                    default: None,
                });
            }
        }

        Ok(Self {
            table: name.to_string(),
            key,
            columns,
        })
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns true if the plan contains a column with the given name.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// The ordered column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntitySchema, PropertyDefinition};
    use std::collections::BTreeMap;

    fn contacts_entity() -> Entity {
        let mut properties = BTreeMap::new();
        properties.insert(
            "contact_id".to_string(),
            PropertyDefinition::of_type(PropertyType::String),
        );
        let mut email = PropertyDefinition::of_type(PropertyType::String);
        email.format = Some("email".to_string());
        properties.insert("email".to_string(), email);
        let mut first_name = PropertyDefinition::of_type(PropertyType::String);
        first_name.max_length = Some(50);
        properties.insert("first_name".to_string(), first_name);
        let mut status = PropertyDefinition::of_type(PropertyType::String);
        status.default = Some(serde_json::json!("lead"));
        properties.insert("status".to_string(), status);
        properties.insert(
            "tags".to_string(),
            PropertyDefinition::of_type(PropertyType::Array),
        );

        Entity {
            key: "contact_id".to_string(),
            schema: EntitySchema {
                kind: "object".to_string(),
                required: vec!["contact_id".to_string(), "email".to_string()],
                properties,
            },
        }
    }

    #[test]
    fn plan_orders_key_tenant_sorted_props_timestamps() {
        let plan = ColumnPlan::for_entity("contacts", &contacts_entity()).unwrap();
        assert_eq!(
            plan.column_names(),
            vec![
                "contact_id",
                "tenant_id",
                "email",
                "first_name",
                "status",
                "tags",
                "created_at",
                "updated_at",
            ]
        );
    }

    #[test]
    fn plan_is_deterministic() {
        let entity = contacts_entity();
        let a = ColumnPlan::for_entity("contacts", &entity).unwrap();
        let b = ColumnPlan::for_entity("contacts", &entity).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn type_mapping() {
        let plan = ColumnPlan::for_entity("contacts", &contacts_entity()).unwrap();
        assert_eq!(plan.column("email").unwrap().ty, ColumnType::Varchar(255));
        assert_eq!(
            plan.column("first_name").unwrap().ty,
            ColumnType::Varchar(50)
        );
        assert_eq!(plan.column("contact_id").unwrap().ty, ColumnType::Text);
        assert_eq!(plan.column("tags").unwrap().ty, ColumnType::Jsonb);
        assert_eq!(
            plan.column("created_at").unwrap().ty,
            ColumnType::TimestampTz
        );
    }

    #[test]
    fn uri_format_maps_to_text() {
        let mut def = PropertyDefinition::of_type(PropertyType::String);
        def.format = Some("uri".to_string());
        def.max_length = Some(100);
        assert_eq!(
            ColumnType::for_property("homepage", &def).unwrap(),
            ColumnType::Text
        );
    }

    #[test]
    fn numeric_types_map() {
        assert_eq!(
            ColumnType::for_property(
                "age",
                &PropertyDefinition::of_type(PropertyType::Integer)
            )
            .unwrap(),
            ColumnType::Integer
        );
        assert_eq!(
            ColumnType::for_property(
                "price",
                &PropertyDefinition::of_type(PropertyType::Number)
            )
            .unwrap(),
            ColumnType::Decimal
        );
        assert_eq!(
            ColumnType::for_property(
                "active",
                &PropertyDefinition::of_type(PropertyType::Boolean)
            )
            .unwrap(),
            ColumnType::Boolean
        );
    }

    #[test]
    fn default_satisfies_required() {
        let mut entity = contacts_entity();
        entity.schema.required.push("status".to_string());
        let plan = ColumnPlan::for_entity("contacts", &entity).unwrap();
        let status = plan.column("status").unwrap();
        assert!(!status.required);
        assert_eq!(status.default, Some(serde_json::json!("lead")));
    }

    #[test]
    fn declared_system_columns_not_duplicated() {
        let mut entity = contacts_entity();
        entity.schema.properties.insert(
            "created_at".to_string(),
            PropertyDefinition::of_type(PropertyType::String),
        );
        let plan = ColumnPlan::for_entity("contacts", &entity).unwrap();
        let created: Vec<_> = plan
            .columns
            .iter()
            .filter(|c| c.name == "created_at")
            .collect();
        assert_eq!(created.len(), 1);
        assert!(created[0].declared);
        // Declared created_at keeps its declared type but its role by name.
        assert_eq!(created[0].ty, ColumnType::Text);
        assert_eq!(created[0].role, ColumnRole::CreatedAt);
        // Declared created_at sorts among the properties, not at the tail.
        let names = plan.column_names();
        assert_eq!(
            names,
            vec![
                "contact_id",
                "tenant_id",
                "created_at",
                "email",
                "first_name",
                "status",
                "tags",
                "updated_at",
            ]
        );
    }

    #[test]
    fn declared_tenant_id_not_duplicated() {
        let mut entity = contacts_entity();
        entity.schema.properties.insert(
            "tenant_id".to_string(),
            PropertyDefinition::of_type(PropertyType::String),
        );
        let plan = ColumnPlan::for_entity("contacts", &entity).unwrap();
        let tenant: Vec<_> = plan
            .columns
            .iter()
            .filter(|c| c.name == "tenant_id")
            .collect();
        assert_eq!(tenant.len(), 1);
        assert!(tenant[0].declared);
        assert_eq!(tenant[0].role, ColumnRole::TenantId);
    }

    #[test]
    fn roles_assigned() {
        let plan = ColumnPlan::for_entity("contacts", &contacts_entity()).unwrap();
        assert_eq!(plan.column("contact_id").unwrap().role, ColumnRole::Key);
        assert_eq!(plan.column("tenant_id").unwrap().role, ColumnRole::TenantId);
        assert_eq!(plan.column("email").unwrap().role, ColumnRole::Data);
        assert_eq!(
            plan.column("updated_at").unwrap().role,
            ColumnRole::UpdatedAt
        );
    }

    #[test]
    fn sql_rendering() {
        assert_eq!(ColumnType::Varchar(50).sql(), "VARCHAR(50)");
        assert_eq!(ColumnType::Text.sql(), "TEXT");
        assert_eq!(ColumnType::Integer.sql(), "INTEGER");
        assert_eq!(ColumnType::Decimal.sql(), "DECIMAL");
        assert_eq!(ColumnType::Boolean.sql(), "BOOLEAN");
        assert_eq!(ColumnType::Jsonb.sql(), "JSONB");
        assert_eq!(ColumnType::TimestampTz.sql(), "TIMESTAMPTZ");
    }

    #[test]
    fn unknown_type_is_an_error() {
        let def = PropertyDefinition {
            declared_type: "tuple".to_string(),
            ..PropertyDefinition::default()
        };
        assert!(ColumnType::for_property("pair", &def).is_err());
    }
}
