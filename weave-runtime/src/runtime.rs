//! Registers controllers, tracks output authorization, and owns each
//! controller's restart backoff (spec sections 4.2 and 6).

use crate::backoff::RestartBackoff;
use crate::input::{Ownership, OutputSpec};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use weave_core::Store;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("controller {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("controller {0:?} is not registered")]
    NotRegistered(String),
    #[error("kind {kind:?} is exclusively owned by controller {owner:?}; {attempted:?} may not write it")]
    ExclusivityViolation {
        kind: String,
        owner: String,
        attempted: String,
    },
    #[error("controller {attempted:?} never declared kind {kind:?} as an output")]
    UndeclaredOutput { kind: String, attempted: String },
}

struct Registration {
    outputs: Vec<OutputSpec>,
}

struct Inner {
    controllers: HashMap<String, Registration>,
    /// Which controller holds exclusive ownership of a given output kind,
    /// if any.
    exclusive_owners: HashMap<String, String>,
    backoffs: HashMap<String, RestartBackoff>,
}

/// The central registry and write-authorization gate.
///
/// The Event Bus itself has no separate type: per-kind change notification
/// is just `Store::watch`, and coalescing/dedup is the
/// [`Scheduler`](crate::scheduler::Scheduler) each controller adapter builds
/// for itself. `Runtime` is what ties registration, authorization, and
/// restart backoff together across controllers.
pub struct Runtime {
    store: Arc<dyn Store>,
    backoff_base: Duration,
    backoff_max: Duration,
    inner: RwLock<Inner>,
}

impl Runtime {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            store,
            backoff_base,
            backoff_max,
            inner: RwLock::new(Inner {
                controllers: HashMap::new(),
                exclusive_owners: HashMap::new(),
                backoffs: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Register a controller's declared outputs. Idempotent registration
    /// under the same name is an error, as is declaring an output kind that
    /// another controller already owns exclusively.
    pub fn register_controller(&self, name: &str, outputs: Vec<OutputSpec>) -> Result<(), RuntimeError> {
        let mut inner = self.inner.write();
        if inner.controllers.contains_key(name) {
            return Err(RuntimeError::AlreadyRegistered(name.to_string()));
        }
        for output in &outputs {
            if let Some(owner) = inner.exclusive_owners.get(&output.kind) {
                return Err(RuntimeError::ExclusivityViolation {
                    kind: output.kind.clone(),
                    owner: owner.clone(),
                    attempted: name.to_string(),
                });
            }
        }
        for output in &outputs {
            if output.ownership == Ownership::Exclusive {
                inner.exclusive_owners.insert(output.kind.clone(), name.to_string());
            }
        }
        inner
            .backoffs
            .insert(name.to_string(), RestartBackoff::new(self.backoff_base, self.backoff_max));
        inner.controllers.insert(name.to_string(), Registration { outputs });
        Ok(())
    }

    /// Same idempotency and exclusivity rules as [`register_controller`](Self::register_controller);
    /// queued controllers register through this alias so call sites read
    /// naturally (`runtime.register_qcontroller(...)`).
    pub fn register_qcontroller(&self, name: &str, outputs: Vec<OutputSpec>) -> Result<(), RuntimeError> {
        self.register_controller(name, outputs)
    }

    /// Verify `controller` may write `kind`. Violations are programmer
    /// errors per spec section 4.2 and should be treated as fatal by the
    /// caller.
    pub fn authorize_write(&self, controller: &str, kind: &str) -> Result<(), RuntimeError> {
        let inner = self.inner.read();
        let registration = inner
            .controllers
            .get(controller)
            .ok_or_else(|| RuntimeError::NotRegistered(controller.to_string()))?;
        if registration.outputs.iter().any(|o| o.kind == kind) {
            return Ok(());
        }
        if let Some(owner) = inner.exclusive_owners.get(kind) {
            return Err(RuntimeError::ExclusivityViolation {
                kind: kind.to_string(),
                owner: owner.clone(),
                attempted: controller.to_string(),
            });
        }
        Err(RuntimeError::UndeclaredOutput {
            kind: kind.to_string(),
            attempted: controller.to_string(),
        })
    }

    /// The delay to wait before this controller's next restart attempt.
    pub fn next_restart_delay(&self, controller: &str) -> Duration {
        let mut inner = self.inner.write();
        inner
            .backoffs
            .get_mut(controller)
            .map_or(self.backoff_base, RestartBackoff::next_delay)
    }

    /// Explicitly reset a controller's restart backoff, e.g. after it
    /// reports a clean reconcile cycle. Never called implicitly by the
    /// runtime itself (see DESIGN.md).
    pub fn reset_backoff(&self, controller: &str) {
        if let Some(backoff) = self.inner.write().backoffs.get_mut(controller) {
            backoff.reset();
        }
    }
}
