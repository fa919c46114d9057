//! Core domain model for the BackSaaS platform.
//!
//! Pure types and functions: schema documents, validation, and the
//! deterministic column planning shared by DDL emission, INSERT binding,
//! and row decoding. No I/O beyond reading schema files; no async.

pub mod columns;
pub mod error;
pub mod schema;
pub mod validate;

pub use columns::{Column, ColumnPlan, ColumnRole, ColumnType};
pub use error::SchemaError;
pub use schema::{
    Entity, EntitySchema, FunctionSpec, PropertyDefinition, PropertyType, Schema, ServiceInfo,
};
pub use validate::{validate, ValidationIssue, ValidationReport, SYSTEM_COLUMNS};
