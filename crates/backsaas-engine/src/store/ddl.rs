//! Pure functions for emitting PostgreSQL DDL and DML text from a column
//! plan.
//!
//! No I/O. No side effects. Every statement consumes the plan's ordered
//! column list, so table creation, INSERT binding, and row decoding can
//! never disagree about which value lands in which column.

use backsaas_core::{Column, ColumnPlan, ColumnRole};
use serde_json::Value;

/// Renders a schema default as a SQL literal for a `DEFAULT` clause.
///
/// Strings are single-quote escaped; arrays and objects become `jsonb`
/// literals. `None` is returned for values that cannot be a column default.
pub fn default_literal(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => {
            let encoded = value.to_string().replace('\'', "''");
            Some(format!("'{encoded}'::jsonb"))
        }
        Value::Null => None,
    }
}

/// Emits `CREATE TABLE IF NOT EXISTS` for the full plan.
///
/// The primary key is the composite `(key, tenant_id)` so that distinct
/// tenants sharing the table may reuse ids.
pub fn create_table(plan: &ColumnPlan) -> String {
    let mut parts = Vec::with_capacity(plan.columns.len() + 1);
    for column in &plan.columns {
        parts.push(column_definition(column));
    }
    if plan.key == "tenant_id" {
        parts.push("PRIMARY KEY (tenant_id)".to_string());
    } else {
        parts.push(format!("PRIMARY KEY ({}, tenant_id)", plan.key));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        plan.table,
        parts.join(",\n    ")
    )
}

/// Emits one `ALTER TABLE ... ADD COLUMN IF NOT EXISTS` per plan column.
///
/// Running these after `create_table` makes provisioning idempotent across
/// schema version bumps that add properties to an existing entity.
pub fn add_missing_columns(plan: &ColumnPlan) -> Vec<String> {
    plan.columns
        .iter()
        .map(|column| {
            format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                plan.table,
                column_definition(column)
            )
        })
        .collect()
}

fn column_definition(column: &Column) -> String {
    let mut def = format!("{} {}", column.name, column.ty.sql());
    if matches!(column.role, ColumnRole::Key | ColumnRole::TenantId) || column.required {
        def.push_str(" NOT NULL");
    }
    if let Some(ref value) = column.default {
        if let Some(literal) = default_literal(value) {
            def.push_str(" DEFAULT ");
            def.push_str(&literal);
        }
    }
    def
}

/// Emits `INSERT ... RETURNING *` over the given subset of plan columns.
///
/// `columns` must be a subsequence of the plan's ordered column list; the
/// caller binds values in the same order. Columns absent from the statement
/// fall back to their DDL defaults.
pub fn insert(plan: &ColumnPlan, columns: &[&Column]) -> String {
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        plan.table,
        names.join(", "),
        placeholders.join(", ")
    )
}

/// Emits `UPDATE ... WHERE key = $n AND tenant_id = $n+1 RETURNING *`.
///
/// The key and tenant placeholders follow the assignment placeholders, in
/// that order.
pub fn update(plan: &ColumnPlan, assignments: &[&Column]) -> String {
    let sets: Vec<String> = assignments
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", c.name, i + 1))
        .collect();
    let key_pos = assignments.len() + 1;
    let tenant_pos = assignments.len() + 2;
    format!(
        "UPDATE {} SET {} WHERE {} = ${} AND tenant_id = ${} RETURNING *",
        plan.table,
        sets.join(", "),
        plan.key,
        key_pos,
        tenant_pos
    )
}

/// Emits the single-row fetch by key within the bound tenant.
pub fn select_one(plan: &ColumnPlan) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = $1 AND tenant_id = $2",
        plan.table, plan.key
    )
}

/// Emits the list query: tenant predicate, AND-joined equality filters,
/// single-column ordering, and LIMIT/OFFSET placeholders.
///
/// `filter_columns` must already be verified against the plan; an unknown
/// `order_by` must be replaced by the caller before reaching here.
pub fn select_many(plan: &ColumnPlan, filter_columns: &[&Column], order_by: &str) -> String {
    let mut predicates = vec!["tenant_id = $1".to_string()];
    for (i, column) in filter_columns.iter().enumerate() {
        predicates.push(format!("{} = ${}", column.name, i + 2));
    }
    let limit_pos = filter_columns.len() + 2;
    let offset_pos = filter_columns.len() + 3;
    format!(
        "SELECT * FROM {} WHERE {} ORDER BY {} LIMIT ${} OFFSET ${}",
        plan.table,
        predicates.join(" AND "),
        order_by,
        limit_pos,
        offset_pos
    )
}

/// Emits the single-row delete by key within the bound tenant.
pub fn delete(plan: &ColumnPlan) -> String {
    format!(
        "DELETE FROM {} WHERE {} = $1 AND tenant_id = $2",
        plan.table, plan.key
    )
}
