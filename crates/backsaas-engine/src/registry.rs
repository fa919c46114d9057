//! The platform schema registry.
//!
//! The platform itself runs as the tenant named `system`, serving the
//! built-in platform schema below. Tenant schema documents are rows of its
//! `schemas` entity; an engine started with `--schema-source registry`
//! loads the highest-version document for its tenant from that table.

use backsaas_core::Schema;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::store::StoreError;

/// The tenant id the platform API runs under.
pub const SYSTEM_TENANT: &str = "system";

/// The platform's own schema: the tenant directory and the versioned
/// schema registry. All rows belong to the `system` tenant; the owning
/// tenant of a registered schema is the `tenant` property, not the scope
/// column.
const PLATFORM_SCHEMA_YAML: &str = r#"
version: 1
service:
  name: platform
  description: BackSaaS platform API
entities:
  tenants:
    key: slug
    schema:
      type: object
      required: [slug, name]
      properties:
        slug:
          type: string
          maxLength: 63
        name:
          type: string
          maxLength: 255
        status:
          type: string
          default: active
          enum: [active, suspended]
  schemas:
    key: schema_id
    schema:
      type: object
      required: [schema_id, tenant, version, definition]
      properties:
        schema_id:
          type: string
        tenant:
          type: string
          maxLength: 63
        version:
          type: integer
          minimum: 1
        definition:
          type: object
"#;

/// Parses the built-in platform schema. This is what a `system` engine
/// serves: registry rows for other tenants can only exist after the
/// platform has provisioned the `schemas` table from this document.
pub fn platform_schema() -> Result<Schema, StoreError> {
    Schema::from_yaml_str(PLATFORM_SCHEMA_YAML).map_err(|e| StoreError::Provisioning {
        message: format!("platform schema is invalid: {e}"),
    })
}

/// Loads the newest registered schema document for a tenant.
///
/// Selects the row with the highest `version`; absence of any row is
/// reported as not-found against the `schemas` entity.
pub async fn load_from_registry(pool: &PgPool, tenant: &str) -> Result<Schema, StoreError> {
    let row = sqlx::query(
        "SELECT definition FROM schemas \
         WHERE tenant_id = $1 AND tenant = $2 \
         ORDER BY version DESC LIMIT 1",
    )
    .bind(SYSTEM_TENANT)
    .bind(tenant)
    .fetch_optional(pool)
    .await
    .map_err(|e| StoreError::Database {
        message: e.to_string(),
    })?
    .ok_or_else(|| StoreError::NotFound {
        entity: "schemas".to_string(),
        id: tenant.to_string(),
    })?;

    let definition: Json<Value> =
        row.try_get("definition").map_err(|e| StoreError::Serialization {
            column: "definition".to_string(),
            message: e.to_string(),
        })?;

    Schema::from_json_value(definition.0).map_err(|e| StoreError::Serialization {
        column: "definition".to_string(),
        message: e.to_string(),
    })
}
