use std::sync::Arc;

use crate::hooks::HookRegistry;
use crate::store::TenantStore;

/// Shared state for engine route handlers.
///
/// One instance serves exactly one tenant: the store carries the tenant
/// binding and the hook registry was resolved from that tenant's schema.
#[derive(Clone)]
pub struct EngineState {
    pub store: Arc<TenantStore>,
    pub hooks: Arc<HookRegistry>,
}

impl EngineState {
    pub fn new(store: Arc<TenantStore>, hooks: Arc<HookRegistry>) -> Self {
        Self { store, hooks }
    }

    /// The tenant this engine instance is bound to.
    pub fn tenant_id(&self) -> &str {
        self.store.tenant_id()
    }
}
