//! Lifecycle hooks resolved from the schema's `functions` section.
//!
//! Hooks are identified by name against a closed, compile-time registry --
//! no user code is ever executed. `before_*` hooks run on the request path
//! and may short-circuit with an error; `after_*` hooks are dispatched onto
//! background tasks after the write has committed, log their own failures,
//! and never affect the response.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use backsaas_core::Schema;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// The fixed set of lifecycle points the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    BeforeRead,
    AfterRead,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    /// Validation hooks; run before `before_create` and `before_update`.
    Validate,
}

impl Trigger {
    /// Parses a trigger-point name as written in schema documents.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "before_read" => Some(Self::BeforeRead),
            "after_read" => Some(Self::AfterRead),
            "before_create" => Some(Self::BeforeCreate),
            "after_create" => Some(Self::AfterCreate),
            "before_update" => Some(Self::BeforeUpdate),
            "after_update" => Some(Self::AfterUpdate),
            "before_delete" => Some(Self::BeforeDelete),
            "after_delete" => Some(Self::AfterDelete),
            "validate" => Some(Self::Validate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeRead => "before_read",
            Self::AfterRead => "after_read",
            Self::BeforeCreate => "before_create",
            Self::AfterCreate => "after_create",
            Self::BeforeUpdate => "before_update",
            Self::AfterUpdate => "after_update",
            Self::BeforeDelete => "before_delete",
            Self::AfterDelete => "after_delete",
            Self::Validate => "validate",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A hook outcome that stops the request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HookError {
    /// The hook rejected the operation; surfaced to the client.
    Rejected { message: String },
    /// The hook itself failed; logged, and surfaced only for `before_*`.
    Failed { message: String },
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { message } => write!(f, "rejected: {message}"),
            Self::Failed { message } => write!(f, "hook failed: {message}"),
        }
    }
}

impl std::error::Error for HookError {}

/// Errors raised while resolving the schema's functions at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HookSetupError {
    /// The schema references a hook name the registry does not provide.
    UnknownHook { function: String },
    /// A function is missing its trigger declaration.
    MissingTrigger { function: String },
    /// The trigger string is not `<entity>.<trigger-point>`.
    InvalidTrigger { function: String, trigger: String },
}

impl fmt::Display for HookSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownHook { function } => {
                write!(f, "function '{function}' is not a registered hook")
            }
            Self::MissingTrigger { function } => {
                write!(f, "function '{function}' does not declare a trigger")
            }
            Self::InvalidTrigger { function, trigger } => {
                write!(
                    f,
                    "function '{function}' has invalid trigger '{trigger}' \
                     (expected '<entity>.<trigger-point>')"
                )
            }
        }
    }
}

impl std::error::Error for HookSetupError {}

// ---------------------------------------------------------------------------
// Hook context & registry
// ---------------------------------------------------------------------------

/// The information a hook receives about the operation in flight.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub tenant_id: String,
    pub entity: String,
    pub trigger: Trigger,
    /// The row involved: the incoming field map for `before_*`, the stored
    /// form for `after_*`. Absent for reads and deletes without a row.
    pub record: Option<Map<String, Value>>,
    /// The `parameters` block from the function declaration.
    pub parameters: Option<Value>,
}

type HookFuture = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send>>;

/// A hook implementation. Plain function pointers keep the registry a
/// closed, compile-time set.
pub type HookFn = fn(HookContext) -> HookFuture;

/// Resolves a hook name against the built-in registry.
pub fn builtin(name: &str) -> Option<HookFn> {
    match name {
        "audit_log" => Some(audit_log),
        "restrict_email_domain" => Some(restrict_email_domain),
        _ => None,
    }
}

/// One schema function bound to its resolved implementation.
#[derive(Clone)]
struct BoundHook {
    name: String,
    func: HookFn,
    parameters: Option<Value>,
}

/// Hook bindings for one tenant's schema, keyed by entity and trigger.
///
/// Built once at startup; a schema function naming an unregistered hook
/// aborts startup rather than failing requests later.
#[derive(Default)]
pub struct HookRegistry {
    bindings: HashMap<(String, Trigger), Vec<BoundHook>>,
}

impl HookRegistry {
    /// Resolves every `validation` and `hook` function in the schema.
    ///
    /// `computed` and `workflow` kinds are recognized by the validator but
    /// carry no runtime dispatch here.
    pub fn from_schema(schema: &Schema) -> Result<Self, HookSetupError> {
        let mut bindings: HashMap<(String, Trigger), Vec<BoundHook>> = HashMap::new();

        for (fn_name, spec) in &schema.functions {
            if spec.kind != "validation" && spec.kind != "hook" {
                continue;
            }
            let trigger_raw =
                spec.trigger
                    .as_deref()
                    .ok_or_else(|| HookSetupError::MissingTrigger {
                        function: fn_name.clone(),
                    })?;
            let (entity, point) = trigger_raw.split_once('.').ok_or_else(|| {
                HookSetupError::InvalidTrigger {
                    function: fn_name.clone(),
                    trigger: trigger_raw.to_string(),
                }
            })?;
            let trigger =
                Trigger::parse(point).ok_or_else(|| HookSetupError::InvalidTrigger {
                    function: fn_name.clone(),
                    trigger: trigger_raw.to_string(),
                })?;
            let func = builtin(fn_name).ok_or_else(|| HookSetupError::UnknownHook {
                function: fn_name.clone(),
            })?;

            bindings
                .entry((entity.to_string(), trigger))
                .or_default()
                .push(BoundHook {
                    name: fn_name.clone(),
                    func,
                    parameters: spec.parameters.clone(),
                });
        }

        Ok(Self { bindings })
    }

    /// Returns true if any hook is bound at this point.
    pub fn has(&self, entity: &str, trigger: Trigger) -> bool {
        self.bindings
            .contains_key(&(entity.to_string(), trigger))
    }

    /// Runs `before_*` (and validation) hooks sequentially on the request
    /// path. The first error stops the chain and the request.
    pub async fn run_before(
        &self,
        entity: &str,
        trigger: Trigger,
        tenant_id: &str,
        record: Option<&Map<String, Value>>,
    ) -> Result<(), HookError> {
        let Some(bound) = self.bindings.get(&(entity.to_string(), trigger)) else {
            return Ok(());
        };
        for hook in bound {
            let ctx = HookContext {
                tenant_id: tenant_id.to_string(),
                entity: entity.to_string(),
                trigger,
                record: record.cloned(),
                parameters: hook.parameters.clone(),
            };
            (hook.func)(ctx).await.map_err(|e| {
                tracing::warn!(hook = %hook.name, entity, trigger = %trigger, error = %e, "before hook stopped request");
                e
            })?;
        }
        Ok(())
    }

    /// Dispatches `after_*` hooks onto background tasks, fire-and-forget.
    ///
    /// Failures are logged and never reach the caller; a client disconnect
    /// does not cancel them.
    pub fn spawn_after(
        &self,
        entity: &str,
        trigger: Trigger,
        tenant_id: &str,
        record: Option<&Map<String, Value>>,
    ) {
        let Some(bound) = self.bindings.get(&(entity.to_string(), trigger)) else {
            return;
        };
        for hook in bound {
            let ctx = HookContext {
                tenant_id: tenant_id.to_string(),
                entity: entity.to_string(),
                trigger,
                record: record.cloned(),
                parameters: hook.parameters.clone(),
            };
            let name = hook.name.clone();
            let func = hook.func;
            tokio::spawn(async move {
                if let Err(e) = func(ctx).await {
                    tracing::error!(hook = %name, error = %e, "after hook failed");
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in hooks
// ---------------------------------------------------------------------------

/// Logs the operation with its tenant, entity, and key fields.
fn audit_log(ctx: HookContext) -> HookFuture {
    Box::pin(async move {
        tracing::info!(
            tenant_id = %ctx.tenant_id,
            entity = %ctx.entity,
            trigger = %ctx.trigger,
            record = ?ctx.record.as_ref().map(|r| r.keys().cloned().collect::<Vec<_>>()),
            "audit"
        );
        Ok(())
    })
}

/// Validation hook: the record's `email` must end in one of the domains
/// listed in `parameters.domains`.
fn restrict_email_domain(ctx: HookContext) -> HookFuture {
    Box::pin(async move {
        let Some(record) = ctx.record.as_ref() else {
            return Ok(());
        };
        let Some(email) = record.get("email").and_then(Value::as_str) else {
            return Ok(());
        };
        let domains: Vec<String> = ctx
            .parameters
            .as_ref()
            .and_then(|p| p.get("domains"))
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if domains.is_empty() {
            return Ok(());
        }
        let allowed = domains
            .iter()
            .any(|d| email.rsplit_once('@').is_some_and(|(_, dom)| dom == d));
        if allowed {
            Ok(())
        } else {
            Err(HookError::Rejected {
                message: format!("email domain is not allowed for '{}'", ctx.entity),
            })
        }
    })
}
