//! Data model and in-process [`Store`](store::Store) implementation for the
//! weave reconciliation engine.
//!
//! This crate has no opinion on scheduling, controllers, or finalizer
//! ordering; it only models *what a resource is* and *how it is stored*. The
//! engine built on top lives in `weave-runtime`.

pub mod error;
pub mod event;
pub mod label;
pub mod memory;
pub mod metadata;
pub mod resource;
pub mod spec;
pub mod store;

pub use error::Error;
pub use event::WatchEvent;
pub use label::{LabelExpr, LabelQuery, Labels};
pub use memory::MemoryStore;
pub use metadata::{Metadata, Phase, Pointer};
pub use resource::Resource;
pub use spec::Spec;
pub use store::{Mutator, Store, UpdateOptions, WatchStream};
