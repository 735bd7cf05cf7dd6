//! Watch events emitted by the store.

use crate::metadata::Pointer;
use crate::resource::Resource;

/// A single change observed on a resource.
///
/// Events for a given resource are observed in version order; across
/// different resources or controllers, no global order is promised (spec
/// section 5).
#[derive(Clone, Debug)]
pub enum WatchEvent {
    Created(Resource),
    Updated { before: Resource, after: Resource },
    Destroyed(Resource),
}

impl WatchEvent {
    #[must_use]
    pub fn pointer(&self) -> Pointer {
        match self {
            WatchEvent::Created(r) | WatchEvent::Destroyed(r) => r.pointer(),
            WatchEvent::Updated { after, .. } => after.pointer(),
        }
    }

    /// The most recent known state of the resource: `after` for `Updated`,
    /// the object itself otherwise. `None` for a `Destroyed` event, since
    /// there is no current state left to reconcile against.
    #[must_use]
    pub fn latest(&self) -> Option<&Resource> {
        match self {
            WatchEvent::Created(r) => Some(r),
            WatchEvent::Updated { after, .. } => Some(after),
            WatchEvent::Destroyed(_) => None,
        }
    }

    /// The resource carried by this event, available even for `Destroyed`
    /// (its last observed state). Used by the store to filter watch streams
    /// by namespace/labels.
    #[must_use]
    pub fn resource(&self) -> &Resource {
        match self {
            WatchEvent::Created(r) | WatchEvent::Destroyed(r) => r,
            WatchEvent::Updated { after, .. } => after,
        }
    }
}
