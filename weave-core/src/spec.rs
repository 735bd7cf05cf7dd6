//! Type-erased resource payloads.
//!
//! A [`Resource`](crate::resource::Resource)'s spec is opaque to the core: the
//! store and runtime never need to know its shape, only controllers that
//! declare a concrete type do. This is the "runtime tags joined with a
//! per-kind trait object" representation called for in the design notes,
//! playing the role `kube_core::DynamicObject` plays for arbitrary
//! Kubernetes kinds.

use std::any::Any;
use std::fmt::Debug;

/// A cloneable, type-erased, thread-safe spec payload.
///
/// Implemented automatically for any `T: Any + Debug + Send + Sync + Clone`;
/// controllers define their own spec structs and never implement this by
/// hand.
pub trait Spec: Any + Debug + Send + Sync {
    #[doc(hidden)]
    fn clone_boxed(&self) -> Box<dyn Spec>;
    #[doc(hidden)]
    fn as_any(&self) -> &dyn Any;
}

impl<T> Spec for T
where
    T: Any + Debug + Send + Sync + Clone,
{
    fn clone_boxed(&self) -> Box<dyn Spec> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Clone for Box<dyn Spec> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Downcast a type-erased spec back to its concrete type.
#[must_use]
pub fn downcast_ref<T: 'static>(spec: &dyn Spec) -> Option<&T> {
    spec.as_any().downcast_ref::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct ClusterSpec {
        talos_version: String,
    }

    #[test]
    fn roundtrips_through_erasure() {
        let boxed: Box<dyn Spec> = Box::new(ClusterSpec {
            talos_version: "v1.7.0".into(),
        });
        let cloned = boxed.clone();
        let recovered: &ClusterSpec = downcast_ref(cloned.as_ref()).expect("downcast");
        assert_eq!(recovered.talos_version, "v1.7.0");
        assert!(downcast_ref::<u32>(boxed.as_ref()).is_none());
    }
}
