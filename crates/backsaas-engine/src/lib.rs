//! The schema-driven API engine.
//!
//! Hosts one tenant's schema: idempotently provisions its relational
//! storage, then serves validated, tenant-scoped CRUD over each entity
//! with pluggable lifecycle hooks.

pub mod error;
pub mod hooks;
pub mod registry;
pub mod routes;
pub mod state;
pub mod store;
pub mod validation;

pub use error::EngineError;
pub use hooks::{HookError, HookRegistry, HookSetupError, Trigger};
pub use routes::engine_routes;
pub use state::EngineState;
pub use store::{QueryOptions, StoreError, TenantStore};
