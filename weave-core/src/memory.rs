//! An in-process, in-memory [`Store`] implementation.
//!
//! This plays the role `kube-client`'s `Api<K>` + the Kubernetes apiserver
//! play together for the teacher: the authoritative place writes land and
//! watches originate from. Unlike a reflector cache, this *is* the source of
//! truth, so every operation is a real read-modify-write against the single
//! table, guarded by one lock.

use crate::error::Error;
use crate::event::WatchEvent;
use crate::label::LabelQuery;
use crate::metadata::{Phase, Pointer};
use crate::resource::Resource;
use crate::store::{Mutator, Store, UpdateOptions, WatchStream};
use ahash::HashMap;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Backlog per per-kind broadcast channel. Overflow drops the oldest event
/// rather than applying backpressure to writers, since writers must never
/// block on a slow or absent watcher.
const CHANNEL_CAPACITY: usize = 1024;

struct Channel {
    tx: async_broadcast::Sender<WatchEvent>,
    // Keeps the channel open even when every active receiver has been
    // dropped, the same trick `kube_runtime::reflector::dispatcher` uses.
    _keepalive: async_broadcast::InactiveReceiver<WatchEvent>,
}

#[derive(Default)]
struct Inner {
    table: BTreeMap<Pointer, Resource>,
    channels: HashMap<String, Channel>,
}

impl Inner {
    fn sender(&mut self, kind: &str) -> async_broadcast::Sender<WatchEvent> {
        if let Some(channel) = self.channels.get(kind) {
            return channel.tx.clone();
        }
        let (mut tx, rx) = async_broadcast::broadcast(CHANNEL_CAPACITY);
        tx.set_overflow(true);
        tx.set_await_active(false);
        let channel = Channel {
            tx: tx.clone(),
            _keepalive: rx.deactivate(),
        };
        self.channels.insert(kind.to_string(), channel);
        tx
    }

    fn receiver(&mut self, kind: &str) -> async_broadcast::Receiver<WatchEvent> {
        self.sender(kind).new_receiver()
    }
}

/// The default, in-process [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, ptr: &Pointer) -> Option<Resource> {
        self.inner.read().table.get(ptr).cloned()
    }

    async fn list(&self, namespace: &str, kind: &str, query: Option<&LabelQuery>) -> Vec<Resource> {
        self.inner
            .read()
            .table
            .range(Pointer::new(namespace, kind, String::new())..)
            .take_while(|(ptr, _)| ptr.namespace == namespace && ptr.kind == kind)
            .map(|(_, res)| res)
            .filter(|res| query.is_none_or(|q| q.matches(&res.metadata.labels)))
            .cloned()
            .collect()
    }

    async fn create(&self, resource: Resource, owner: Option<&str>) -> Result<Resource, Error> {
        let ptr = resource.pointer();
        if resource.metadata.owner.as_deref() != owner {
            return Err(Error::OwnerConflict(ptr));
        }
        let (created, tx) = {
            let mut inner = self.inner.write();
            if inner.table.contains_key(&ptr) {
                return Err(Error::AlreadyExists(ptr));
            }
            let mut resource = resource;
            resource.metadata.version = 1;
            resource.metadata.phase = Phase::Running;
            let now = Utc::now();
            resource.metadata.created = now;
            resource.metadata.updated = now;
            inner.table.insert(ptr.clone(), resource.clone());
            let tx = inner.sender(&ptr.kind);
            (resource, tx)
        };
        let _ = tx.broadcast_direct(WatchEvent::Created(created.clone())).await;
        Ok(created)
    }

    async fn update(
        &self,
        previous: &Resource,
        mutate: Mutator,
        opts: UpdateOptions<'_>,
    ) -> Result<Resource, Error> {
        let ptr = previous.pointer();
        let (before, after, tx) = {
            let mut inner = self.inner.write();
            let current = inner
                .table
                .get(&ptr)
                .cloned()
                .ok_or_else(|| Error::NotFound(ptr.clone()))?;
            if current.metadata.version != previous.metadata.version {
                return Err(Error::Conflict {
                    pointer: ptr.clone(),
                    expected: previous.metadata.version,
                    found: current.metadata.version,
                });
            }
            if opts.owner != current.metadata.owner.as_deref() {
                return Err(Error::OwnerConflict(ptr.clone()));
            }
            if current.metadata.phase.is_tearing_down() && !opts.allow_tearing_down {
                return Err(Error::PhaseConflict(ptr.clone()));
            }
            let before = current.clone();
            let mut next = current;
            mutate(&mut next);
            next.metadata.version += 1;
            next.metadata.updated = Utc::now();
            inner.table.insert(ptr.clone(), next.clone());
            let tx = inner.sender(&ptr.kind);
            (before, next, tx)
        };
        let _ = tx
            .broadcast_direct(WatchEvent::Updated {
                before,
                after: after.clone(),
            })
            .await;
        Ok(after)
    }

    async fn teardown(&self, ptr: &Pointer, owner: Option<&str>) -> Result<bool, Error> {
        let outcome = {
            let mut inner = self.inner.write();
            let current = inner
                .table
                .get(ptr)
                .cloned()
                .ok_or_else(|| Error::NotFound(ptr.clone()))?;
            if owner != current.metadata.owner.as_deref() {
                return Err(Error::OwnerConflict(ptr.clone()));
            }
            if current.metadata.phase.is_tearing_down() {
                // Idempotent: already torn down, no new event.
                return Ok(current.metadata.finalizers.is_empty());
            }
            let before = current.clone();
            let mut next = current;
            next.metadata.phase = Phase::TearingDown;
            next.metadata.version += 1;
            next.metadata.updated = Utc::now();
            inner.table.insert(ptr.clone(), next.clone());
            let tx = inner.sender(&ptr.kind);
            let ready = next.metadata.finalizers.is_empty();
            (before, next, tx, ready)
        };
        let (before, after, tx, ready) = outcome;
        let _ = tx.broadcast_direct(WatchEvent::Updated { before, after }).await;
        Ok(ready)
    }

    async fn destroy(&self, ptr: &Pointer, owner: Option<&str>) -> Result<(), Error> {
        let (removed, tx) = {
            let mut inner = self.inner.write();
            let current = inner
                .table
                .get(ptr)
                .cloned()
                .ok_or_else(|| Error::NotFound(ptr.clone()))?;
            if owner != current.metadata.owner.as_deref() {
                return Err(Error::OwnerConflict(ptr.clone()));
            }
            if !current.metadata.phase.is_tearing_down() {
                return Err(Error::PhaseConflict(ptr.clone()));
            }
            if !current.metadata.finalizers.is_empty() {
                return Err(Error::Invalid(
                    ptr.clone(),
                    format!("{} finalizer(s) still present", current.metadata.finalizers.len()),
                ));
            }
            inner.table.remove(ptr);
            let tx = inner.sender(&ptr.kind);
            (current, tx)
        };
        let _ = tx.broadcast_direct(WatchEvent::Destroyed(removed)).await;
        Ok(())
    }

    async fn add_finalizer(&self, ptr: &Pointer, name: &str) -> Result<(), Error> {
        let outcome = {
            let mut inner = self.inner.write();
            let current = inner
                .table
                .get(ptr)
                .cloned()
                .ok_or_else(|| Error::NotFound(ptr.clone()))?;
            if current.metadata.has_finalizer(name) {
                return Ok(());
            }
            if current.metadata.phase.is_tearing_down() {
                return Err(Error::PhaseConflict(ptr.clone()));
            }
            let before = current.clone();
            let mut next = current;
            next.metadata.finalizers.push(name.to_string());
            next.metadata.version += 1;
            next.metadata.updated = Utc::now();
            inner.table.insert(ptr.clone(), next.clone());
            let tx = inner.sender(&ptr.kind);
            (before, next, tx)
        };
        let (before, after, tx) = outcome;
        let _ = tx.broadcast_direct(WatchEvent::Updated { before, after }).await;
        Ok(())
    }

    async fn remove_finalizer(&self, ptr: &Pointer, name: &str) -> Result<(), Error> {
        let outcome = {
            let mut inner = self.inner.write();
            let current = inner
                .table
                .get(ptr)
                .cloned()
                .ok_or_else(|| Error::NotFound(ptr.clone()))?;
            if !current.metadata.has_finalizer(name) {
                return Ok(());
            }
            let before = current.clone();
            let mut next = current;
            next.metadata.finalizers.retain(|f| f != name);
            next.metadata.version += 1;
            next.metadata.updated = Utc::now();
            inner.table.insert(ptr.clone(), next.clone());
            let tx = inner.sender(&ptr.kind);
            (before, next, tx)
        };
        let (before, after, tx) = outcome;
        let _ = tx.broadcast_direct(WatchEvent::Updated { before, after }).await;
        Ok(())
    }

    fn watch(&self, namespace: &str, kind: &str, query: Option<LabelQuery>) -> WatchStream {
        let rx = self.inner.write().receiver(kind);
        let namespace = namespace.to_string();
        rx.filter(move |event| {
            let res = event.resource();
            let matches = res.metadata.namespace == namespace
                && query.as_ref().is_none_or(|q| q.matches(&res.metadata.labels));
            futures::future::ready(matches)
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;

    #[derive(Debug, Clone, PartialEq)]
    struct Widget {
        color: String,
    }

    fn widget(ns: &str, id: &str, owner: Option<&str>) -> Resource {
        let mut md = Metadata::new(ns, "Widget", id);
        if let Some(o) = owner {
            md = md.with_owner(o);
        }
        Resource::new(md, Widget { color: "red".into() })
    }

    #[tokio::test]
    async fn create_assigns_version_one_and_running_phase() {
        let store = MemoryStore::new();
        let created = store.create(widget("default", "w1", Some("ctrl")), Some("ctrl")).await.unwrap();
        assert_eq!(created.metadata.version, 1);
        assert_eq!(created.metadata.phase, Phase::Running);
    }

    #[tokio::test]
    async fn create_rejects_owner_mismatch() {
        let store = MemoryStore::new();
        let err = store.create(widget("default", "w1", Some("ctrl")), None).await.unwrap_err();
        assert!(matches!(err, Error::OwnerConflict(_)));
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store = MemoryStore::new();
        store.create(widget("default", "w1", None), None).await.unwrap();
        let err = store.create(widget("default", "w1", None), None).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_bumps_version_by_exactly_one() {
        let store = MemoryStore::new();
        let created = store.create(widget("default", "w1", None), None).await.unwrap();
        let updated = store
            .update(
                &created,
                Box::new(|r| r.spec = Box::new(Widget { color: "blue".into() })),
                UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(updated.metadata.version, 2);
        assert_eq!(updated.spec_as::<Widget>().unwrap().color, "blue");
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(widget("default", "w1", None), None).await.unwrap();
        store
            .update(&created, Box::new(|_| {}), UpdateOptions::default())
            .await
            .unwrap();
        // `created` is now stale (version 1, store has version 2).
        let err = store
            .update(&created, Box::new(|_| {}), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn update_on_tearing_down_requires_opt_in() {
        let store = MemoryStore::new();
        let created = store.create(widget("default", "w1", Some("ctrl")), Some("ctrl")).await.unwrap();
        store.add_finalizer(&created.pointer(), "dependent").await.unwrap();
        store.teardown(&created.pointer(), Some("ctrl")).await.unwrap();
        let stale = store.get(&created.pointer()).await.unwrap();
        let err = store
            .update(&stale, Box::new(|_| {}), UpdateOptions { owner: Some("ctrl"), allow_tearing_down: false })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PhaseConflict(_)));
        store
            .update(&stale, Box::new(|_| {}), UpdateOptions { owner: Some("ctrl"), allow_tearing_down: true })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_reports_readiness() {
        let store = MemoryStore::new();
        let created = store.create(widget("default", "w1", Some("ctrl")), Some("ctrl")).await.unwrap();
        let ptr = created.pointer();
        assert!(store.teardown(&ptr, Some("ctrl")).await.unwrap());
        assert!(store.teardown(&ptr, Some("ctrl")).await.unwrap());

        let ptr2 = Pointer::new("default", "Widget", "w2");
        store.create(widget("default", "w2", Some("ctrl")), Some("ctrl")).await.unwrap();
        store.add_finalizer(&ptr2, "dependent").await.unwrap();
        assert!(!store.teardown(&ptr2, Some("ctrl")).await.unwrap());
    }

    #[tokio::test]
    async fn destroy_requires_tearing_down_and_no_finalizers() {
        let store = MemoryStore::new();
        let created = store.create(widget("default", "w1", Some("ctrl")), Some("ctrl")).await.unwrap();
        let ptr = created.pointer();
        let err = store.destroy(&ptr, Some("ctrl")).await.unwrap_err();
        assert!(matches!(err, Error::PhaseConflict(_)));

        store.add_finalizer(&ptr, "dependent").await.unwrap();
        store.teardown(&ptr, Some("ctrl")).await.unwrap();
        let err = store.destroy(&ptr, Some("ctrl")).await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_, _)));

        store.remove_finalizer(&ptr, "dependent").await.unwrap();
        store.destroy(&ptr, Some("ctrl")).await.unwrap();
        assert!(store.get(&ptr).await.is_none());
    }

    #[tokio::test]
    async fn finalizer_add_forbidden_once_tearing_down() {
        let store = MemoryStore::new();
        let created = store.create(widget("default", "w1", Some("ctrl")), Some("ctrl")).await.unwrap();
        let ptr = created.pointer();
        store.add_finalizer(&ptr, "a").await.unwrap();
        store.teardown(&ptr, Some("ctrl")).await.unwrap();
        let err = store.add_finalizer(&ptr, "b").await.unwrap_err();
        assert!(matches!(err, Error::PhaseConflict(_)));
        // Removal is still permitted.
        store.remove_finalizer(&ptr, "a").await.unwrap();
        store.destroy(&ptr, Some("ctrl")).await.unwrap();
    }

    #[tokio::test]
    async fn list_is_ordered_and_label_filtered() {
        let store = MemoryStore::new();
        for (id, color) in [("w3", "red"), ("w1", "blue"), ("w2", "red")] {
            let mut md = Metadata::new("default", "Widget", id);
            md.labels.insert("color".into(), color.into());
            store.create(Resource::new(md, Widget { color: color.into() }), None).await.unwrap();
        }
        let all = store.list("default", "Widget", None).await;
        assert_eq!(
            all.iter().map(|r| r.metadata.id.clone()).collect::<Vec<_>>(),
            vec!["w1", "w2", "w3"]
        );
        let red = store
            .list("default", "Widget", Some(&LabelQuery::new().eq("color", "red")))
            .await;
        assert_eq!(red.len(), 2);
    }

    #[tokio::test]
    async fn watch_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        let query = LabelQuery::new().eq("tier", "gold");
        let mut stream = store.watch("default", "Widget", Some(query));

        let mut md = Metadata::new("default", "Widget", "w1");
        md.labels.insert("tier".into(), "silver".into());
        store.create(Resource::new(md, Widget { color: "red".into() }), None).await.unwrap();

        let mut md2 = Metadata::new("default", "Widget", "w2");
        md2.labels.insert("tier".into(), "gold".into());
        store.create(Resource::new(md2, Widget { color: "blue".into() }), None).await.unwrap();

        let event = stream.next().await.unwrap();
        assert_eq!(event.pointer().id, "w2");
    }
}
