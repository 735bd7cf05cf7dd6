//! Controller-level declarations: input/output specs and the queue token
//! they compile down to when consulting the store.

use weave_core::Pointer;

/// How an input kind relates to a controller's reconcile dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    /// Observed, but a change to it does not by itself trigger a reconcile.
    Weak,
    /// A change triggers a reconcile; absence is not itself an error.
    Strong,
    /// The one input that drives queue dispatch for a queued controller.
    Primary,
    /// Translated to affected primary ids via `MapInput`.
    Mapped,
    /// Like `Mapped`, but events are only interesting once the mapped
    /// resource is destroy-ready (`tearingDown` with no finalizers but its
    /// own).
    MappedDestroyReady,
    /// Like `Strong`, but only fires once the input is destroy-ready.
    DestroyReady,
}

/// A declared input kind for a controller.
#[derive(Clone, Debug)]
pub struct InputSpec {
    pub kind: String,
    pub namespace: Option<String>,
    pub id: Option<String>,
    pub linkage: Linkage,
}

impl InputSpec {
    #[must_use]
    pub fn new(kind: impl Into<String>, linkage: Linkage) -> Self {
        Self {
            kind: kind.into(),
            namespace: None,
            id: None,
            linkage,
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Whether a controller's output kind may be written by other controllers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// No other registered controller may own a resource of this kind.
    Exclusive,
    /// Many controllers may write resources of this kind.
    Shared,
}

/// A declared output kind for a controller.
#[derive(Clone, Debug)]
pub struct OutputSpec {
    pub kind: String,
    pub ownership: Ownership,
}

impl OutputSpec {
    #[must_use]
    pub fn new(kind: impl Into<String>, ownership: Ownership) -> Self {
        Self {
            kind: kind.into(),
            ownership,
        }
    }
}

/// The `(kind, id)` pair a queued controller reconciles at a time; a
/// namespace-scoped variant of [`Pointer`] used as the scheduler's message
/// type.
pub type QueueToken = Pointer;
