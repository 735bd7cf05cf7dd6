//! Cross-controller teardown coordinator (spec section 4.5).
//!
//! Plays the role the teacher's `finalizer()` helper plays for a single
//! reconciler, but as a standalone coordinator over [`Store`] rather than a
//! per-reconcile wrapper: any caller that holds a resource's finalizer can
//! drive it through `tearingDown` and on to destruction once every
//! finalizer, including its own, has cleared.

use thiserror::Error;
use weave_core::{Error as StoreError, Pointer, Store};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to tear down {0}: {1}")]
    Teardown(Pointer, #[source] StoreError),
    #[error("failed to destroy {0}: {1}")]
    Destroy(Pointer, #[source] StoreError),
}

/// Idempotently transition `ptr` to `tearingDown` and destroy it if it is
/// already finalizer-free. Returns `true` iff the resource is gone (either it
/// was destroyed just now, or it was already gone).
///
/// Safe to call repeatedly: a resource still waiting on dependents to drop
/// their finalizers just reports `false` again next time.
pub async fn teardown_and_destroy(store: &dyn Store, ptr: &Pointer, owner: Option<&str>) -> Result<bool, Error> {
    let Some(resource) = store.get(ptr).await else {
        return Ok(true);
    };
    let ready = if resource.metadata.phase.is_tearing_down() {
        resource.metadata.finalizers.is_empty()
    } else {
        store
            .teardown(ptr, owner)
            .await
            .map_err(|err| Error::Teardown(ptr.clone(), err))?
    };
    if !ready {
        return Ok(false);
    }
    match store.destroy(ptr, owner).await {
        Ok(()) => Ok(true),
        Err(StoreError::NotFound(_)) => Ok(true),
        Err(err) => Err(Error::Destroy(ptr.clone(), err)),
    }
}

/// Options shared by a batch [`teardown_and_destroy_all`] call.
#[derive(Clone, Copy, Debug, Default)]
pub struct TeardownAllOptions<'a> {
    pub owner: Option<&'a str>,
}

/// Drive [`teardown_and_destroy`] over every pointer in `ptrs`, continuing
/// past individual failures so one stuck resource doesn't block the rest of
/// the batch. Returns the pointers that are not yet destroy-ready, paired
/// with an error if the attempt on them failed outright.
pub async fn teardown_and_destroy_all(
    store: &dyn Store,
    ptrs: &[Pointer],
    opts: TeardownAllOptions<'_>,
) -> Vec<(Pointer, Option<Error>)> {
    let mut pending = Vec::new();
    for ptr in ptrs {
        match teardown_and_destroy(store, ptr, opts.owner).await {
            Ok(true) => {}
            Ok(false) => pending.push((ptr.clone(), None)),
            Err(err) => pending.push((ptr.clone(), Some(err))),
        }
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::MemoryStore;

    #[derive(Debug, Clone)]
    struct Widget;

    fn resource(ptr: &Pointer) -> weave_core::Resource {
        weave_core::Resource::new(weave_core::Metadata::new(ptr.namespace.clone(), ptr.kind.clone(), ptr.id.clone()), Widget)
    }

    #[tokio::test]
    async fn destroys_immediately_when_finalizer_free() {
        let store = MemoryStore::new();
        let ptr = Pointer::new("ns", "Widget", "a");
        store.create(resource(&ptr), None).await.unwrap();

        let ready = teardown_and_destroy(&store, &ptr, None).await.unwrap();
        assert!(ready);
        assert!(store.get(&ptr).await.is_none());
    }

    #[tokio::test]
    async fn waits_for_finalizers_to_clear() {
        let store = MemoryStore::new();
        let ptr = Pointer::new("ns", "Widget", "a");
        store.create(resource(&ptr), None).await.unwrap();
        store.add_finalizer(&ptr, "dependent").await.unwrap();

        let ready = teardown_and_destroy(&store, &ptr, None).await.unwrap();
        assert!(!ready);
        assert!(store.get(&ptr).await.unwrap().metadata.phase.is_tearing_down());

        store.remove_finalizer(&ptr, "dependent").await.unwrap();
        let ready = teardown_and_destroy(&store, &ptr, None).await.unwrap();
        assert!(ready);
        assert!(store.get(&ptr).await.is_none());
    }

    #[tokio::test]
    async fn missing_resource_is_already_ready() {
        let store = MemoryStore::new();
        let ptr = Pointer::new("ns", "Widget", "absent");
        assert!(teardown_and_destroy(&store, &ptr, None).await.unwrap());
    }

    #[tokio::test]
    async fn batch_reports_pending_and_clears_ready_ones() {
        let store = MemoryStore::new();
        let ready_ptr = Pointer::new("ns", "Widget", "ready");
        let stuck_ptr = Pointer::new("ns", "Widget", "stuck");
        store.create(resource(&ready_ptr), None).await.unwrap();
        store.create(resource(&stuck_ptr), None).await.unwrap();
        store.add_finalizer(&stuck_ptr, "dependent").await.unwrap();

        let pending = teardown_and_destroy_all(&store, &[ready_ptr, stuck_ptr.clone()], TeardownAllOptions::default()).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, stuck_ptr);
        assert!(pending[0].1.is_none());
    }
}
