//! Runtime half of the reconciliation fabric: the event scheduler, the two
//! controller adapters, the teardown coordinator, the task runner, and the
//! cleanup/tracker toolkits built on top of `weave-core`'s [`Store`].

pub mod backoff;
pub mod cleanup;
pub mod collaborators;
pub mod context;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod future_hash_map;
pub mod input;
pub mod runner;
pub mod runtime;
pub mod scheduler;
pub mod tasks;
pub mod tracker;

pub use context::{Context, ContextWithTeardown};
pub use error::ReconcileError;
pub use input::{InputSpec, Linkage, OutputSpec, Ownership, QueueToken};
pub use runtime::{Runtime, RuntimeError};
pub use tracker::ResourceTracker;
