//! The versioned, owned, finalizer-guarded record stored for every resource.

use crate::metadata::{Metadata, Pointer};
use crate::spec::{self, Spec};
use std::fmt;

/// A single entity in the store.
///
/// The spec is kept type-erased (see [`spec`](crate::spec)) so the store and
/// runtime can hold resources of arbitrary, mutually unrelated kinds in the
/// same table.
#[derive(Clone, Debug)]
pub struct Resource {
    pub metadata: Metadata,
    pub spec: Box<dyn Spec>,
}

impl Resource {
    pub fn new(metadata: Metadata, spec: impl Spec + 'static) -> Self {
        Self {
            metadata,
            spec: Box::new(spec),
        }
    }

    #[must_use]
    pub fn pointer(&self) -> Pointer {
        self.metadata.pointer()
    }

    /// Downcast the spec to a concrete type, if it matches.
    #[must_use]
    pub fn spec_as<T: 'static>(&self) -> Option<&T> {
        spec::downcast_ref(self.spec.as_ref())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (v{})", self.pointer(), self.metadata.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Dummy(u32);

    #[test]
    fn spec_as_downcasts() {
        let res = Resource::new(Metadata::new("default", "Widget", "w1"), Dummy(7));
        assert_eq!(res.spec_as::<Dummy>().unwrap().0, 7);
        assert!(res.spec_as::<u64>().is_none());
    }
}
