//! Cleanup Handler Toolkit: composable handlers for a primary resource's
//! finalizer-removal path (spec section 4.7).
//!
//! These compose the same way the teacher's `Scheduler`/`Runner` pair
//! compose streams rather than inheriting from one base type: each handler
//! is a small [`CleanupHandler`] impl, and [`Combine`] runs a list of them
//! concurrently the way `controller::queued`'s watchers are all spawned side
//! by side.

use crate::error::ReconcileError;
use crate::finalizer::teardown_and_destroy;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::marker::PhantomData;
use weave_core::{LabelQuery, Resource, Store};

/// Whether a handler considers the primary's teardown ready to proceed past
/// it, or whether it still has work in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ready,
    Skip,
}

impl Outcome {
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Outcome::Ready)
    }
}

/// One step in a primary resource's finalizer-removal path.
#[async_trait]
pub trait CleanupHandler: Send + Sync {
    async fn run(&self, store: &dyn Store, primary: &Resource, owner: Option<&str>) -> Result<Outcome, ReconcileError>;
}

/// Tears down and destroys the single output of kind `O` whose id equals the
/// primary's id.
pub struct SameIdHandler<O> {
    output_kind: String,
    _marker: PhantomData<O>,
}

impl<O> SameIdHandler<O> {
    #[must_use]
    pub fn new(output_kind: impl Into<String>) -> Self {
        Self {
            output_kind: output_kind.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<O: Send + Sync> CleanupHandler for SameIdHandler<O> {
    async fn run(&self, store: &dyn Store, primary: &Resource, owner: Option<&str>) -> Result<Outcome, ReconcileError> {
        let ptr = weave_core::Pointer::new(primary.metadata.namespace.clone(), self.output_kind.clone(), primary.metadata.id.clone());
        let ready = teardown_and_destroy(store, &ptr, owner).await.map_err(ReconcileError::fatal)?;
        Ok(if ready { Outcome::Ready } else { Outcome::Skip })
    }
}

/// Tears down every output of kind `O` matching `selector`; `Ready` once all
/// of them are destroy-ready (and have been destroyed).
pub struct RemoveOutputs<O> {
    output_kind: String,
    selector: Box<dyn Fn(&Resource) -> LabelQuery + Send + Sync>,
    _marker: PhantomData<O>,
}

impl<O> RemoveOutputs<O> {
    #[must_use]
    pub fn new(output_kind: impl Into<String>, selector: impl Fn(&Resource) -> LabelQuery + Send + Sync + 'static) -> Self {
        Self {
            output_kind: output_kind.into(),
            selector: Box::new(selector),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<O: Send + Sync> CleanupHandler for RemoveOutputs<O> {
    async fn run(&self, store: &dyn Store, primary: &Resource, owner: Option<&str>) -> Result<Outcome, ReconcileError> {
        let query = (self.selector)(primary);
        let matches = store.list(&primary.metadata.namespace, &self.output_kind, Some(&query)).await;
        if matches.is_empty() {
            return Ok(Outcome::Ready);
        }
        let mut all_ready = true;
        for resource in matches {
            let ready = teardown_and_destroy(store, &resource.pointer(), owner)
                .await
                .map_err(ReconcileError::fatal)?;
            all_ready &= ready;
        }
        Ok(if all_ready { Outcome::Ready } else { Outcome::Skip })
    }
}

/// Blocks teardown while any output of kind `O` matching `selector` still
/// exists, without tearing them down itself. Used when a *different*
/// controller owns those outputs and must finish its own teardown first.
pub struct HasNoOutputs<O> {
    output_kind: String,
    selector: Box<dyn Fn(&Resource) -> LabelQuery + Send + Sync>,
    _marker: PhantomData<O>,
}

impl<O> HasNoOutputs<O> {
    #[must_use]
    pub fn new(output_kind: impl Into<String>, selector: impl Fn(&Resource) -> LabelQuery + Send + Sync + 'static) -> Self {
        Self {
            output_kind: output_kind.into(),
            selector: Box::new(selector),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<O: Send + Sync> CleanupHandler for HasNoOutputs<O> {
    async fn run(&self, store: &dyn Store, primary: &Resource, _owner: Option<&str>) -> Result<Outcome, ReconcileError> {
        let query = (self.selector)(primary);
        let matches = store.list(&primary.metadata.namespace, &self.output_kind, Some(&query)).await;
        Ok(if matches.is_empty() { Outcome::Ready } else { Outcome::Skip })
    }
}

/// An arbitrary user callback, for cleanup steps the prebuilt handlers don't
/// cover (e.g. `P`/`O` above modeling a relationship more complex than a
/// label query).
///
/// The callback borrows `store`/`primary` for the duration of its returned
/// future rather than owning a `'static` future, since all it's ever given
/// is the borrowed pair `run` itself receives.
pub struct CustomHandler<P, O> {
    #[allow(clippy::type_complexity)]
    callback: Box<dyn for<'a> Fn(&'a dyn Store, &'a Resource) -> BoxFuture<'a, Result<Outcome, ReconcileError>> + Send + Sync>,
    _marker: PhantomData<(P, O)>,
}

impl<P, O> CustomHandler<P, O> {
    #[must_use]
    pub fn new(
        callback: impl for<'a> Fn(&'a dyn Store, &'a Resource) -> BoxFuture<'a, Result<Outcome, ReconcileError>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            callback: Box::new(callback),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<P: Send + Sync, O: Send + Sync> CleanupHandler for CustomHandler<P, O> {
    async fn run(&self, store: &dyn Store, primary: &Resource, _owner: Option<&str>) -> Result<Outcome, ReconcileError> {
        (self.callback)(store, primary).await
    }
}

/// Runs every handler concurrently; `Skip` from any one of them propagates
/// (teardown is not yet ready), and any error aborts the combination.
pub struct Combine {
    handlers: Vec<Box<dyn CleanupHandler>>,
}

impl Combine {
    #[must_use]
    pub fn new(handlers: Vec<Box<dyn CleanupHandler>>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl CleanupHandler for Combine {
    async fn run(&self, store: &dyn Store, primary: &Resource, owner: Option<&str>) -> Result<Outcome, ReconcileError> {
        let outcomes = futures::future::try_join_all(self.handlers.iter().map(|h| h.run(store, primary, owner))).await?;
        Ok(if outcomes.iter().all(|o| o.is_ready()) {
            Outcome::Ready
        } else {
            Outcome::Skip
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::{LabelQuery, MemoryStore, Metadata, Resource};

    #[derive(Debug, Clone)]
    struct Widget;

    fn primary(id: &str) -> Resource {
        Resource::new(Metadata::new("ns", "Cluster", id), Widget)
    }

    #[tokio::test]
    async fn same_id_handler_waits_then_reports_ready() {
        let store = MemoryStore::new();
        let primary = primary("a");
        store
            .create(
                Resource::new(Metadata::new("ns", "Secret", "a"), Widget),
                None,
            )
            .await
            .unwrap();

        let handler = SameIdHandler::<Widget>::new("Secret");
        let outcome = handler.run(&store, &primary, None).await.unwrap();
        assert_eq!(outcome, Outcome::Ready);
        assert!(store.get(&weave_core::Pointer::new("ns", "Secret", "a")).await.is_none());
    }

    #[tokio::test]
    async fn has_no_outputs_blocks_while_matches_exist() {
        let store = MemoryStore::new();
        let primary = primary("a");
        store
            .create(Resource::new(Metadata::new("ns", "Route", "r1"), Widget), None)
            .await
            .unwrap();

        let handler = HasNoOutputs::<Widget>::new("Route", |_p: &Resource| LabelQuery::new());
        assert_eq!(handler.run(&store, &primary, None).await.unwrap(), Outcome::Skip);

        store
            .teardown(&weave_core::Pointer::new("ns", "Route", "r1"), None)
            .await
            .unwrap();
        store
            .destroy(&weave_core::Pointer::new("ns", "Route", "r1"), None)
            .await
            .unwrap();
        assert_eq!(handler.run(&store, &primary, None).await.unwrap(), Outcome::Ready);
    }

    #[tokio::test]
    async fn combine_skips_if_any_handler_skips() {
        let store = MemoryStore::new();
        let primary = primary("a");
        store
            .create(Resource::new(Metadata::new("ns", "Route", "r1"), Widget), None)
            .await
            .unwrap();

        let combined = Combine::new(vec![
            Box::new(HasNoOutputs::<Widget>::new("Route", |_p: &Resource| LabelQuery::new())),
            Box::new(SameIdHandler::<Widget>::new("Secret")),
        ]);
        assert_eq!(combined.run(&store, &primary, None).await.unwrap(), Outcome::Skip);
    }

    #[tokio::test]
    async fn custom_handler_borrows_store_and_primary_for_its_future() {
        let store = MemoryStore::new();
        let primary = primary("a");
        store
            .create(Resource::new(Metadata::new("ns", "Link", "a"), Widget), None)
            .await
            .unwrap();

        let handler = CustomHandler::<Widget, Widget>::new(|store, primary| {
            Box::pin(async move {
                let ptr = weave_core::Pointer::new(primary.metadata.namespace.clone(), "Link", primary.metadata.id.clone());
                if let Some(link) = store.get(&ptr).await {
                    if !link.metadata.phase.is_tearing_down() {
                        store.teardown(&ptr, None).await.map_err(ReconcileError::fatal)?;
                    }
                }
                Ok(Outcome::Ready)
            })
        });

        assert_eq!(handler.run(&store, &primary, None).await.unwrap(), Outcome::Ready);
        assert!(store.get(&weave_core::Pointer::new("ns", "Link", "a")).await.unwrap().metadata.phase.is_tearing_down());
    }
}
