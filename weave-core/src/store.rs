//! The Resource Store contract (spec section 4.1).

use crate::error::Error;
use crate::event::WatchEvent;
use crate::label::LabelQuery;
use crate::metadata::{Phase, Pointer};
use crate::resource::Resource;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A closure that mutates a [`Resource`] in place during
/// [`Store::update`]. Boxed so that [`Store`] stays object-safe.
pub type Mutator = Box<dyn FnOnce(&mut Resource) + Send>;

/// A stream of [`WatchEvent`]s for a single kind.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Options accepted by [`Store::update`].
#[derive(Clone, Debug, Default)]
pub struct UpdateOptions<'a> {
    /// The caller must present the owner it believes it holds; `None` means
    /// "I am not claiming ownership". Mismatches fail with `OwnerConflict`.
    pub owner: Option<&'a str>,
    /// Opt into mutating a `tearingDown` resource. Without this, updating a
    /// resource that has entered teardown fails with `PhaseConflict`.
    pub allow_tearing_down: bool,
}

/// The authoritative, versioned, owner/finalizer-checked repository of all
/// resources.
///
/// All operations are phrased against a `previous` snapshot (for
/// `update`/`teardown`/`destroy`) the way an optimistic-concurrency API using
/// a prior-observed `resourceVersion` would: callers fetch a snapshot with
/// [`Store::get`] and present it back, so a write that raced against another
/// writer surfaces as a retryable [`Error::Conflict`] instead of silently
/// clobbering it.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a single resource by its pointer.
    async fn get(&self, ptr: &Pointer) -> Option<Resource>;

    /// List all resources of `kind` in `namespace`, optionally filtered by a
    /// [`LabelQuery`]. Stable iteration order by id; this is a snapshot, not
    /// a restartable cursor (see DESIGN NOTES, "Lazy sequences").
    async fn list(&self, namespace: &str, kind: &str, query: Option<&LabelQuery>) -> Vec<Resource>;

    /// Create a brand new resource. `owner` must match the resource's
    /// declared `metadata.owner` (including both being `None`).
    async fn create(&self, resource: Resource, owner: Option<&str>) -> Result<Resource, Error>;

    /// Read-modify-write `previous` (by pointer) via `mutate`. Fails with
    /// `Error::Conflict` if the stored version has moved on since `previous`
    /// was observed, `Error::OwnerConflict` if `opts.owner` doesn't match the
    /// current owner, and `Error::PhaseConflict` if the resource is
    /// `tearingDown` and `opts.allow_tearing_down` is `false`.
    async fn update(
        &self,
        previous: &Resource,
        mutate: Mutator,
        opts: UpdateOptions<'_>,
    ) -> Result<Resource, Error>;

    /// Idempotently transition a resource to `tearingDown`. Returns `true`
    /// iff it has no finalizers left (i.e. it is immediately destroy-ready).
    async fn teardown(&self, ptr: &Pointer, owner: Option<&str>) -> Result<bool, Error>;

    /// Destroy a resource. Requires `tearingDown` phase, zero finalizers, and
    /// a matching owner.
    async fn destroy(&self, ptr: &Pointer, owner: Option<&str>) -> Result<(), Error>;

    /// Idempotently add a finalizer. Forbidden (`PhaseConflict`) once the
    /// resource has entered `tearingDown`.
    async fn add_finalizer(&self, ptr: &Pointer, name: &str) -> Result<(), Error>;

    /// Idempotently remove a finalizer. Always permitted, including during
    /// `tearingDown` — this is how dependents signal they are done.
    async fn remove_finalizer(&self, ptr: &Pointer, name: &str) -> Result<(), Error>;

    /// Subscribe to change events for a single `kind`, optionally filtered.
    fn watch(&self, namespace: &str, kind: &str, query: Option<LabelQuery>) -> WatchStream;
}

#[must_use]
pub fn matches_phase(resource: &Resource, allow_tearing_down: bool) -> bool {
    allow_tearing_down || resource.metadata.phase == Phase::Running
}
