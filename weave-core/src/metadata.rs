//! Resource identity and metadata.

use chrono::{DateTime, Utc};
use std::fmt;

/// The unique identity of a [`Resource`](crate::resource::Resource): a triple
/// of (namespace, kind, id).
///
/// Namespaces partition the id space; a `(namespace, kind, id)` triple is
/// unique across the whole store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer {
    pub namespace: String,
    pub kind: String,
    pub id: String,
}

impl Pointer {
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.id)
    }
}

/// The two phases a resource can be in.
///
/// A resource starts `Running`. Teardown is an explicit transition to
/// `TearingDown`; phase never moves back to `Running`, which is what breaks
/// would-be cycles in the finalizer graph (see DESIGN.md).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Running,
    TearingDown,
}

impl Phase {
    #[must_use]
    pub fn is_tearing_down(self) -> bool {
        matches!(self, Phase::TearingDown)
    }
}

/// Versioned metadata carried by every [`Resource`](crate::resource::Resource).
#[derive(Clone, Debug)]
pub struct Metadata {
    pub namespace: String,
    pub kind: String,
    pub id: String,
    /// Monotonically increasing per-resource version; bumped on every write.
    pub version: u64,
    pub phase: Phase,
    /// The controller authorized to mutate the spec and destroy the
    /// resource. `None` means unowned (writable by any caller that also
    /// passes no owner).
    pub owner: Option<String>,
    /// Ordered set of finalizer names. Destruction is blocked while non-empty.
    pub finalizers: Vec<String>,
    pub labels: crate::label::Labels,
    pub annotations: crate::label::Labels,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Metadata {
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            id: id.into(),
            version: 0,
            phase: Phase::Running,
            owner: None,
            finalizers: Vec::new(),
            labels: crate::label::Labels::new(),
            annotations: crate::label::Labels::new(),
            created: now,
            updated: now,
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: crate::label::Labels) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn pointer(&self) -> Pointer {
        Pointer::new(self.namespace.clone(), self.kind.clone(), self.id.clone())
    }

    #[must_use]
    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.iter().any(|f| f == name)
    }

    /// Tearing down with no finalizers left of its own; destruction is one
    /// `Store::destroy` call away.
    #[must_use]
    pub fn is_destroy_ready(&self) -> bool {
        self.phase.is_tearing_down() && self.finalizers.is_empty()
    }
}
