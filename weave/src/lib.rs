//! Facade crate: re-exports [`weave_core`] and [`weave_runtime`] behind one
//! name, the way the teacher's top-level `kube` crate re-exports
//! `kube-core`/`kube-client`/`kube-runtime`.
//!
//! Downstream controllers typically only need `use weave::prelude::*;`.

pub mod config;

pub use weave_core as core;
pub use weave_runtime as runtime;

pub use weave_core::{
    Error, LabelExpr, LabelQuery, Labels, MemoryStore, Metadata, Mutator, Phase, Pointer, Resource, Spec, Store, UpdateOptions,
    WatchEvent, WatchStream,
};
pub use weave_runtime::{
    cleanup, collaborators, controller, finalizer, tasks, tracker, Context, ContextWithTeardown, InputSpec, Linkage, OutputSpec,
    Ownership, QueueToken, ReconcileError, Runtime, RuntimeError,
};

pub use config::RuntimeConfig;

/// The common imports a controller implementation reaches for.
pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use weave_core::{LabelQuery, Metadata, Phase, Pointer, Resource, Spec, Store, WatchEvent};
    pub use weave_runtime::controller::queued::{ByLabel, MappedInput, QController, QSettings, SameId};
    pub use weave_runtime::controller::sequential::SequentialController;
    pub use weave_runtime::{Context, ContextWithTeardown, InputSpec, OutputSpec, Ownership, ReconcileError, Runtime};
}
