//! Tenant-bound database operations over PostgreSQL.
//!
//! This is the only pathway by which the engine touches storage. One
//! [`TenantStore`] is bound to exactly one `tenant_id`; every statement it
//! emits carries that tenant in its predicate, and every write overwrites
//! any caller-supplied tenant value with the bound one, so cross-tenant
//! access is structurally impossible.
//!
//! Pure SQL emission lives in `ddl`; value encoding/decoding in `values`.

pub mod ddl;
pub mod error;
pub mod values;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backsaas_core::{Column, ColumnPlan, ColumnRole, ColumnType, Entity, Schema, SYSTEM_COLUMNS};
use chrono::{DateTime, Timelike, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

pub use error::StoreError;

use crate::validation::{validate_insert, validate_update};
use values::BindValue;

/// Default page size for list queries.
const DEFAULT_LIMIT: i64 = 50;
/// Hard cap on the page size.
const MAX_LIMIT: i64 = 1000;

/// Returns the current UTC instant truncated to microsecond precision,
/// the unit that round-trips through a TIMESTAMPTZ column.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

/// Pagination, filtering, and ordering options for a list query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Equality filters as raw query-string values; coerced per column type.
    pub filters: Vec<(String, String)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order_by: Option<String>,
}

/// The per-tenant storage handle: a connection pool, the tenant binding,
/// and one precomputed column plan per entity.
///
/// Plans are derived once at construction and consumed by every DDL,
/// INSERT, and row-decoding path, which keeps the column ordering
/// identical across all three.
pub struct TenantStore {
    pool: PgPool,
    tenant_id: String,
    schema: Arc<Schema>,
    plans: HashMap<String, ColumnPlan>,
}

impl TenantStore {
    /// Builds a store over an existing pool, deriving every entity's
    /// column plan up front.
    pub fn new(
        pool: PgPool,
        tenant_id: impl Into<String>,
        schema: Arc<Schema>,
    ) -> Result<Self, StoreError> {
        let mut plans = HashMap::with_capacity(schema.entities.len());
        for (name, entity) in &schema.entities {
            let plan = ColumnPlan::for_entity(name, entity).map_err(|e| {
                StoreError::Provisioning {
                    message: e.to_string(),
                }
            })?;
            plans.insert(name.clone(), plan);
        }
        Ok(Self {
            pool,
            tenant_id: tenant_id.into(),
            schema,
            plans,
        })
    }

    /// Connects a pool and builds the store.
    pub async fn connect(
        database_url: &str,
        tenant_id: impl Into<String>,
        schema: Arc<Schema>,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database {
                message: e.to_string(),
            })?;
        Self::new(pool, tenant_id, schema)
    }

    /// Builds the store over a lazy pool that defers connecting until the
    /// first statement runs.
    pub fn connect_lazy(
        database_url: &str,
        tenant_id: impl Into<String>,
        schema: Arc<Schema>,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy(database_url)
            .map_err(|e| StoreError::Database {
                message: e.to_string(),
            })?;
        Self::new(pool, tenant_id, schema)
    }

    /// The tenant every operation is scoped to.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The schema this store serves.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns true if the store can reach the database.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    fn plan(&self, entity: &str) -> Result<&ColumnPlan, StoreError> {
        self.plans.get(entity).ok_or_else(|| StoreError::UnknownEntity {
            entity: entity.to_string(),
        })
    }

    fn entity(&self, name: &str) -> Result<&Entity, StoreError> {
        self.schema
            .entities
            .get(name)
            .ok_or_else(|| StoreError::UnknownEntity {
                entity: name.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Provisioning
    // -----------------------------------------------------------------------

    /// Idempotently provisions one table per entity: `CREATE TABLE IF NOT
    /// EXISTS` for the full plan, then `ADD COLUMN IF NOT EXISTS` per
    /// column so a schema version bump that adds properties converges an
    /// existing table. A failure here is fatal to engine startup.
    pub async fn ensure_tables(&self) -> Result<(), StoreError> {
        // Schema entities iterate in name order, so provisioning order is
        // deterministic too.
        for name in self.schema.entities.keys() {
            let plan = self.plan(name)?;
            let provisioning = |e: sqlx::Error| StoreError::Provisioning {
                message: format!("entity '{name}': {e}"),
            };
            sqlx::query(&ddl::create_table(plan))
                .execute(&self.pool)
                .await
                .map_err(&provisioning)?;
            for statement in ddl::add_missing_columns(plan) {
                sqlx::query(&statement)
                    .execute(&self.pool)
                    .await
                    .map_err(&provisioning)?;
            }
            tracing::debug!(entity = %name, "table provisioned");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Validates a full field map against the entity without touching the
    /// store. The first failing rule is reported.
    pub fn validate(&self, entity: &str, data: &Map<String, Value>) -> Result<(), StoreError> {
        validate_insert(self.entity(entity)?, data)
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Inserts one row, returning the stored form.
    ///
    /// Generates a UUID for an absent string key, stamps both timestamps
    /// with the same microsecond instant, and binds values positionally in
    /// the plan's column order. Columns absent from the input are left to
    /// their DDL defaults.
    pub async fn insert(
        &self,
        entity_name: &str,
        mut data: Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let plan = self.plan(entity_name)?;
        let entity = self.entity(entity_name)?;

        // Caller-supplied system values are never trusted: implicit system
        // columns are stripped, and a declared tenant_id is overwritten
        // with the bound tenant.
        for system in SYSTEM_COLUMNS {
            if !entity.declares(system) {
                data.remove(*system);
            }
        }
        if entity.declares("tenant_id") {
            data.insert(
                "tenant_id".to_string(),
                Value::String(self.tenant_id.clone()),
            );
        }

        let key_column = self.key_column(plan)?;
        if !data.contains_key(&plan.key) {
            if matches!(key_column.ty, ColumnType::Text | ColumnType::Varchar(_)) {
                data.insert(
                    plan.key.clone(),
                    Value::String(Uuid::new_v4().to_string()),
                );
            }
            // Non-string keys cannot be generated; the required check below
            // reports the absence.
        }

        validate_insert(entity, &data)?;

        let id_display = data
            .get(&plan.key)
            .map(value_display)
            .unwrap_or_default();

        let now = now_micros();
        let mut columns: Vec<&Column> = Vec::with_capacity(plan.columns.len());
        let mut binds: Vec<BindValue> = Vec::with_capacity(plan.columns.len());
        for column in &plan.columns {
            match column.role {
                ColumnRole::TenantId if !column.declared => {
                    columns.push(column);
                    binds.push(BindValue::Text(Some(self.tenant_id.clone())));
                }
                ColumnRole::CreatedAt | ColumnRole::UpdatedAt if !column.declared => {
                    columns.push(column);
                    binds.push(BindValue::Timestamp(Some(now)));
                }
                _ => {
                    if let Some(value) = data.get(&column.name) {
                        columns.push(column);
                        binds.push(values::encode(column, value)?);
                    }
                }
            }
        }

        let sql = ddl::insert(plan, &columns);
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = values::bind(query, bind);
        }
        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, entity_name, &id_display))?;
        values::decode_row(plan, &row)
    }

    /// Applies a partial update, returning the stored form.
    ///
    /// The key, tenant, and creation timestamp are never updatable; the
    /// update timestamp advances unless the schema manages it itself.
    /// Zero affected rows is reported as not-found.
    pub async fn update(
        &self,
        entity_name: &str,
        id: &str,
        mut data: Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let plan = self.plan(entity_name)?;
        let entity = self.entity(entity_name)?;

        data.remove(&plan.key);
        data.remove("tenant_id");
        data.remove("created_at");
        if !entity.declares("updated_at") {
            data.remove("updated_at");
        }

        validate_update(entity, &data)?;

        let now = now_micros();
        let mut columns: Vec<&Column> = Vec::new();
        let mut binds: Vec<BindValue> = Vec::new();
        for column in &plan.columns {
            match column.role {
                ColumnRole::Key | ColumnRole::TenantId => {}
                ColumnRole::UpdatedAt if !column.declared => {
                    columns.push(column);
                    binds.push(BindValue::Timestamp(Some(now)));
                }
                _ => {
                    if let Some(value) = data.get(&column.name) {
                        columns.push(column);
                        binds.push(values::encode(column, value)?);
                    }
                }
            }
        }

        // A patch with nothing to assign (possible when the schema manages
        // updated_at itself) degenerates to a read.
        if columns.is_empty() {
            return self.get(entity_name, id).await;
        }

        let sql = ddl::update(plan, &columns);
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = values::bind(query, bind);
        }
        query = values::bind(query, self.key_bind(plan, id)?);
        query = values::bind(query, BindValue::Text(Some(self.tenant_id.clone())));

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, entity_name, id))?
            .ok_or_else(|| StoreError::NotFound {
                entity: entity_name.to_string(),
                id: id.to_string(),
            })?;
        values::decode_row(plan, &row)
    }

    /// Fetches one row by key.
    pub async fn get(
        &self,
        entity_name: &str,
        id: &str,
    ) -> Result<Map<String, Value>, StoreError> {
        let plan = self.plan(entity_name)?;
        let sql = ddl::select_one(plan);
        let mut query = sqlx::query(&sql);
        query = values::bind(query, self.key_bind(plan, id)?);
        query = values::bind(query, BindValue::Text(Some(self.tenant_id.clone())));
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, entity_name, id))?
            .ok_or_else(|| StoreError::NotFound {
                entity: entity_name.to_string(),
                id: id.to_string(),
            })?;
        values::decode_row(plan, &row)
    }

    /// Runs a list query: AND-joined equality filters, bounded pagination,
    /// single-column ordering.
    pub async fn query(
        &self,
        entity_name: &str,
        options: &QueryOptions,
    ) -> Result<Vec<Map<String, Value>>, StoreError> {
        let plan = self.plan(entity_name)?;

        let mut filter_columns: Vec<&Column> = Vec::with_capacity(options.filters.len());
        let mut binds: Vec<BindValue> = Vec::with_capacity(options.filters.len());
        for (name, raw) in &options.filters {
            let column = plan.column(name).ok_or_else(|| StoreError::Validation {
                message: format!("unknown filter property '{name}'"),
            })?;
            let value = values::coerce_filter(column, raw)?;
            filter_columns.push(column);
            binds.push(values::encode(column, &value)?);
        }

        // Only a known column name may reach the ORDER BY clause.
        let order_by = match options.order_by.as_deref() {
            Some(name) if plan.has_column(name) => name.to_string(),
            _ => "created_at DESC".to_string(),
        };

        let limit = options.limit.unwrap_or(DEFAULT_LIMIT).clamp(0, MAX_LIMIT);
        let offset = options.offset.unwrap_or(0).max(0);

        let sql = ddl::select_many(plan, &filter_columns, &order_by);
        let mut query = sqlx::query(&sql);
        query = values::bind(query, BindValue::Text(Some(self.tenant_id.clone())));
        for bind in binds {
            query = values::bind(query, bind);
        }
        query = query.bind(limit).bind(offset);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, entity_name, ""))?;
        rows.iter().map(|row| values::decode_row(plan, row)).collect()
    }

    /// Deletes one row by key. Deleting an absent id is not-found and
    /// leaves the table untouched.
    pub async fn delete(&self, entity_name: &str, id: &str) -> Result<(), StoreError> {
        let plan = self.plan(entity_name)?;
        let sql = ddl::delete(plan);
        let mut query = sqlx::query(&sql);
        query = values::bind(query, self.key_bind(plan, id)?);
        query = values::bind(query, BindValue::Text(Some(self.tenant_id.clone())));
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, entity_name, id))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: entity_name.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Encodes a path-segment id for the entity's key column type.
    fn key_bind(&self, plan: &ColumnPlan, id: &str) -> Result<BindValue, StoreError> {
        let key_column = self.key_column(plan)?;
        let value = values::coerce_filter(key_column, id)?;
        values::encode(key_column, &value)
    }

    fn key_column<'a>(&self, plan: &'a ColumnPlan) -> Result<&'a Column, StoreError> {
        plan.column(&plan.key).ok_or_else(|| StoreError::Database {
            message: format!("plan for '{}' is missing its key column", plan.table),
        })
    }
}

fn value_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_micros_truncates() {
        let ts = now_micros();
        assert_eq!(ts.nanosecond() % 1_000, 0);
    }

    #[test]
    fn query_options_default_is_empty() {
        let options = QueryOptions::default();
        assert!(options.filters.is_empty());
        assert!(options.limit.is_none());
        assert!(options.order_by.is_none());
    }
}
