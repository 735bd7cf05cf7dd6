//! Resource Tracker: per-reconcile bookkeeping that lists existing outputs
//! matching a query, marks which to keep, and tears down the rest (spec
//! section 4.8).
//!
//! The common case this replaces: a controller that produces a variable
//! number of outputs per primary (e.g. one `Route` per exposed service) and
//! must delete whichever ones it didn't touch this cycle. Built on
//! [`crate::finalizer::teardown_and_destroy`] the same way `controller::queued`
//! tears down its single output.

use crate::error::ReconcileError;
use crate::finalizer::teardown_and_destroy;
use std::collections::HashSet;
use std::sync::Arc;
use weave_core::{LabelQuery, Pointer, Store};

/// Tracks which resources of one `(namespace, kind)` a reconcile cycle has
/// touched, so [`cleanup`](Self::cleanup) can remove whatever it didn't.
pub struct ResourceTracker {
    store: Arc<dyn Store>,
    namespace: String,
    kind: String,
    query: Option<LabelQuery>,
    kept: HashSet<String>,
}

impl ResourceTracker {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, namespace: impl Into<String>, kind: impl Into<String>, query: Option<LabelQuery>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            kind: kind.into(),
            query,
            kept: HashSet::new(),
        }
    }

    /// Mark `id` as still wanted; it is excluded from this cycle's cleanup.
    pub fn keep(&mut self, id: impl Into<String>) {
        self.kept.insert(id.into());
    }

    /// Tear down and destroy every tracked resource that wasn't [`keep`](Self::keep)d
    /// this cycle. Resources still draining finalizers are left alone and
    /// reported as pending; `on_destroy_ready` fires once per resource that
    /// this call actually destroyed.
    pub async fn cleanup(
        &self,
        owner: Option<&str>,
        mut on_destroy_ready: Option<&mut dyn FnMut(&Pointer)>,
    ) -> Result<Vec<Pointer>, ReconcileError> {
        let current = self.store.list(&self.namespace, &self.kind, self.query.as_ref()).await;
        let mut pending = Vec::new();
        for resource in current {
            if self.kept.contains(&resource.metadata.id) {
                continue;
            }
            let ptr = resource.pointer();
            let ready = teardown_and_destroy(self.store.as_ref(), &ptr, owner)
                .await
                .map_err(ReconcileError::fatal)?;
            if ready {
                if let Some(callback) = on_destroy_ready.as_deref_mut() {
                    callback(&ptr);
                }
            } else {
                pending.push(ptr);
            }
        }
        Ok(pending)
    }
}
