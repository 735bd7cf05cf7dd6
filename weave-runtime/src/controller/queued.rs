//! Queued Transform Controller adapter (spec section 4.4).
//!
//! Execution model is the teacher's per-id serialized runner
//! ([`crate::runner::Runner`] atop [`crate::scheduler`]) plus a semaphore
//! bounding concurrency, fed by three kinds of watchers: the primary kind
//! itself, any declared mapped inputs, and the output kind (so teardown
//! waits wake up on the output actually becoming destroy-ready instead of
//! polling).

use crate::error::ReconcileError;
use crate::input::{InputSpec, OutputSpec};
use crate::runner::Runner;
use crate::runtime::Runtime;
use crate::scheduler::{debounced_scheduler, ScheduleRequest};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{future::BoxFuture, FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use weave_core::store::{Mutator, UpdateOptions};
use weave_core::{Metadata, Pointer, Resource, Spec, Store};

/// Maps a non-primary input event to the set of primary ids it affects.
#[async_trait]
pub trait Mapper: Send + Sync {
    async fn map(&self, store: &dyn Store, namespace: &str, pointer: &Pointer) -> Vec<String>;
}

/// The changed resource's own id is the affected primary id.
pub struct SameId;

#[async_trait]
impl Mapper for SameId {
    async fn map(&self, _store: &dyn Store, _namespace: &str, pointer: &Pointer) -> Vec<String> {
        vec![pointer.id.clone()]
    }
}

/// Every primary resource sharing the changed resource's value of
/// `cluster_label` is affected.
pub struct ByLabel {
    pub cluster_label: String,
    pub primary_kind: String,
}

#[async_trait]
impl Mapper for ByLabel {
    async fn map(&self, store: &dyn Store, namespace: &str, pointer: &Pointer) -> Vec<String> {
        let Some(changed) = store.get(pointer).await else {
            return vec![];
        };
        let Some(value) = changed.metadata.labels.get(&self.cluster_label) else {
            return vec![];
        };
        let query = weave_core::LabelQuery::new().eq(self.cluster_label.clone(), value.clone());
        store
            .list(namespace, &self.primary_kind, Some(&query))
            .await
            .into_iter()
            .map(|r| r.metadata.id)
            .collect()
    }
}

/// Ignores the input entirely; used for mapped kinds that should be
/// observable but never trigger a reconcile on their own.
pub struct NoneMapper;

#[async_trait]
impl Mapper for NoneMapper {
    async fn map(&self, _store: &dyn Store, _namespace: &str, _pointer: &Pointer) -> Vec<String> {
        vec![]
    }
}

/// Static configuration for one queued controller instance.
#[derive(Clone)]
pub struct QSettings {
    pub name: String,
    pub namespace: String,
    pub primary_kind: String,
    pub output: OutputSpec,
    /// Bounded parallelism across distinct primary ids. Default 1.
    pub concurrency: usize,
    /// Defaults to `name` if empty; the finalizer the QC places on each
    /// primary while it owns a live output for it.
    pub finalizer_name: String,
}

impl QSettings {
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, primary_kind: impl Into<String>, output: OutputSpec) -> Self {
        let name = name.into();
        Self {
            finalizer_name: name.clone(),
            name,
            namespace: namespace.into(),
            primary_kind: primary_kind.into(),
            output,
            concurrency: 1,
        }
    }
}

/// One non-primary input and the mapper that translates its events to
/// affected primary ids.
pub struct MappedInput {
    pub spec: InputSpec,
    pub mapper: Arc<dyn Mapper>,
}

/// The per-primary-key reconciler: one input resource maps to zero or one
/// output resource with a derived id.
#[async_trait]
pub trait QController: Send + Sync + 'static {
    fn settings(&self) -> QSettings;

    /// Any additional, non-primary inputs this controller watches.
    fn mapped_inputs(&self) -> Vec<MappedInput> {
        vec![]
    }

    /// Derive the output's identity from the primary's.
    fn map_metadata(&self, primary: &Metadata) -> Metadata;

    /// Recover the primary's pointer from an output's metadata. Must be the
    /// exact inverse of [`Self::map_metadata`].
    fn unmap_metadata(&self, output: &Metadata) -> Pointer;

    /// Compute the desired output spec from the primary's current state.
    /// Called once per reconcile while the primary is `running`.
    async fn transform(&self, runtime: &Runtime, primary: &Resource) -> Result<Box<dyn Spec>, ReconcileError>;

    /// Run while the primary is `tearingDown`, before the QC's own
    /// finalizer is removed. Defaults to a no-op, for controllers whose
    /// only cleanup is tearing down their own output (handled automatically).
    async fn finalizer_removal(&self, _runtime: &Runtime, _primary: &Resource) -> Result<(), ReconcileError> {
        Ok(())
    }
}

const CONFLICT_RETRY_LIMIT: u32 = 3;
const PHASE_CONFLICT_REQUEUE: Duration = Duration::from_millis(100);
const SCHEDULER_DEBOUNCE: Duration = Duration::from_millis(20);

/// Register `qc` with `runtime` and drive it until `cancel` fires.
pub async fn drive(qc: Arc<dyn QController>, runtime: Arc<Runtime>, cancel: CancellationToken) {
    let settings = qc.settings();
    runtime
        .register_qcontroller(&settings.name, vec![settings.output.clone()])
        .expect("queued controller double-registered");

    let (tx, rx) = mpsc::unbounded::<ScheduleRequest<Pointer>>();
    let scheduler = debounced_scheduler(rx, SCHEDULER_DEBOUNCE);

    spawn_primary_watcher(&settings, runtime.store(), tx.clone(), cancel.clone());
    spawn_output_watcher(qc.clone(), &settings, runtime.store(), tx.clone(), cancel.clone());
    for mapped in qc.mapped_inputs() {
        spawn_mapped_watcher(&settings, mapped, runtime.store(), tx.clone(), cancel.clone());
    }

    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let requeue_tx = tx.clone();
    let runner = Runner::new(scheduler, move |ptr: &Pointer| -> BoxFuture<'static, ()> {
        let qc = qc.clone();
        let runtime = runtime.clone();
        let settings = settings.clone();
        let ptr = ptr.clone();
        let semaphore = semaphore.clone();
        let requeue_tx = requeue_tx.clone();
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            process_one(qc.as_ref(), &runtime, &settings, &ptr, &requeue_tx).await;
        }
        .boxed()
    });
    // Drop the driver's own handle last: the watcher tasks and the runner's
    // requeue handle each hold a clone, so the scheduler's stream only ends
    // once all of those are gone too.
    drop(tx);
    futures::pin_mut!(runner);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            item = runner.next() => if item.is_none() { break },
        }
    }
}

fn spawn_primary_watcher(
    settings: &QSettings,
    store: Arc<dyn Store>,
    tx: mpsc::UnboundedSender<ScheduleRequest<Pointer>>,
    cancel: CancellationToken,
) {
    let namespace = settings.namespace.clone();
    let kind = settings.primary_kind.clone();
    tokio::spawn(async move {
        let mut events = store.watch(&namespace, &kind, None);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.next() => {
                    let Some(event) = event else { break };
                    let _ = tx.unbounded_send(ScheduleRequest {
                        message: event.pointer(),
                        run_at: tokio::time::Instant::now(),
                    });
                }
            }
        }
    });
}

fn spawn_mapped_watcher(
    settings: &QSettings,
    mapped: MappedInput,
    store: Arc<dyn Store>,
    tx: mpsc::UnboundedSender<ScheduleRequest<Pointer>>,
    cancel: CancellationToken,
) {
    let namespace = settings.namespace.clone();
    let primary_kind = settings.primary_kind.clone();
    let watch_namespace = mapped.spec.namespace.clone().unwrap_or_else(|| namespace.clone());
    let kind = mapped.spec.kind.clone();
    let linkage = mapped.spec.linkage;
    tokio::spawn(async move {
        let mut events = store.watch(&watch_namespace, &kind, None);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.next() => {
                    let Some(event) = event else { break };
                    if !super::linkage_triggers(linkage, &event) {
                        continue;
                    }
                    let ids = mapped.mapper.map(store.as_ref(), &namespace, &event.pointer()).await;
                    for id in ids {
                        let _ = tx.unbounded_send(ScheduleRequest {
                            message: Pointer::new(namespace.clone(), primary_kind.clone(), id),
                            run_at: tokio::time::Instant::now(),
                        });
                    }
                }
            }
        }
    });
}

fn spawn_output_watcher(
    qc: Arc<dyn QController>,
    settings: &QSettings,
    store: Arc<dyn Store>,
    tx: mpsc::UnboundedSender<ScheduleRequest<Pointer>>,
    cancel: CancellationToken,
) {
    let namespace = settings.namespace.clone();
    let kind = settings.output.kind.clone();
    tokio::spawn(async move {
        let mut events = store.watch(&namespace, &kind, None);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.next() => {
                    let Some(event) = event else { break };
                    let output_metadata = &event.resource().metadata;
                    let primary = qc.unmap_metadata(output_metadata);
                    let _ = tx.unbounded_send(ScheduleRequest {
                        message: primary,
                        run_at: tokio::time::Instant::now(),
                    });
                }
            }
        }
    });
}

#[instrument(skip(qc, runtime, requeue_tx), fields(controller = %settings.name, pointer = %ptr))]
async fn process_one(
    qc: &dyn QController,
    runtime: &Runtime,
    settings: &QSettings,
    ptr: &Pointer,
    requeue_tx: &mpsc::UnboundedSender<ScheduleRequest<Pointer>>,
) {
    let store = runtime.store();
    let Some(primary) = store.get(ptr).await else {
        debug!("primary no longer present, dropping");
        return;
    };

    let result = if primary.metadata.phase.is_tearing_down() {
        run_teardown(qc, runtime, settings, &primary).await
    } else {
        run_transform(qc, runtime, settings, &primary).await
    };

    if let Err(err) = result {
        handle_error(runtime, settings, ptr, err, requeue_tx);
    }
}

async fn run_transform(
    qc: &dyn QController,
    runtime: &Runtime,
    settings: &QSettings,
    primary: &Resource,
) -> Result<(), ReconcileError> {
    let store = runtime.store();
    if !primary.metadata.has_finalizer(&settings.finalizer_name) {
        store.add_finalizer(&primary.pointer(), &settings.finalizer_name).await?;
        // The finalizer-add bumped the version; this cycle re-fires on that
        // event, so stop here rather than transforming a stale snapshot.
        return Ok(());
    }

    let desired = match qc.transform(runtime, primary).await {
        Ok(spec) => spec,
        Err(ReconcileError::DestroyOutput) => return destroy_output(qc, settings, &store, primary).await,
        Err(err) => return Err(err),
    };
    let mut output_metadata = qc.map_metadata(&primary.metadata);
    output_metadata.owner = Some(settings.name.clone());
    let output_ptr = output_metadata.pointer();
    runtime
        .authorize_write(&settings.name, &output_ptr.kind)
        .map_err(ReconcileError::fatal)?;

    match store.get(&output_ptr).await {
        Some(existing) => {
            let mk_mutate = move || -> Mutator {
                let desired = desired.clone();
                Box::new(move |resource: &mut Resource| resource.spec = desired)
            };
            retry_on_conflict(store.as_ref(), &existing, mk_mutate, Some(&settings.name)).await?;
        }
        None => {
            let mut resource = Resource::new(output_metadata, Placeholder);
            resource.spec = desired;
            store.create(resource, Some(&settings.name)).await?;
        }
    }
    Ok(())
}

/// Tear down (and, once finalizer-free, destroy) this primary's output.
/// Shared by an explicit `DestroyOutput` transform result and by the
/// teardown path once the primary itself is being torn down.
async fn destroy_output(
    qc: &dyn QController,
    settings: &QSettings,
    store: &Arc<dyn Store>,
    primary: &Resource,
) -> Result<(), ReconcileError> {
    let output_ptr = qc.map_metadata(&primary.metadata).pointer();
    match store.get(&output_ptr).await {
        None => Ok(()),
        Some(output) if output.metadata.is_destroy_ready() => {
            store.destroy(&output_ptr, Some(&settings.name)).await?;
            Ok(())
        }
        Some(output) if output.metadata.phase.is_tearing_down() => Ok(()),
        Some(_) => {
            store.teardown(&output_ptr, Some(&settings.name)).await?;
            Ok(())
        }
    }
}

/// A throwaway value satisfying `Resource::new`'s `Spec + 'static` bound;
/// immediately overwritten with the real transform output before the
/// resource is ever stored or observed.
#[derive(Debug, Clone)]
struct Placeholder;

async fn run_teardown(
    qc: &dyn QController,
    runtime: &Runtime,
    settings: &QSettings,
    primary: &Resource,
) -> Result<(), ReconcileError> {
    let store = runtime.store();
    qc.finalizer_removal(runtime, primary).await?;
    destroy_output(qc, settings, &store, primary).await?;

    let output_ptr = qc.map_metadata(&primary.metadata).pointer();
    if store.get(&output_ptr).await.is_none() {
        // Output already gone; safe to release our hold on the primary.
        store
            .remove_finalizer(&primary.pointer(), &settings.finalizer_name)
            .await?;
    }
    // else: wait for the output watcher to wake us once its finalizers drain.
    Ok(())
}

async fn retry_on_conflict(
    store: &dyn Store,
    initial: &Resource,
    mk_mutate: impl Fn() -> Mutator,
    owner: Option<&str>,
) -> Result<(), ReconcileError> {
    let mut current = initial.clone();
    for attempt in 0..=CONFLICT_RETRY_LIMIT {
        let opts = UpdateOptions {
            owner,
            allow_tearing_down: false,
        };
        match store.update(&current, mk_mutate(), opts).await {
            Ok(_) => return Ok(()),
            Err(weave_core::Error::Conflict { .. }) if attempt < CONFLICT_RETRY_LIMIT => {
                current = store.get(&current.pointer()).await.ok_or_else(|| {
                    ReconcileError::from(weave_core::Error::NotFound(current.pointer()))
                })?;
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ReconcileError::Requeue(Duration::from_millis(100 * u64::from(CONFLICT_RETRY_LIMIT))))
}

fn handle_error(
    runtime: &Runtime,
    settings: &QSettings,
    ptr: &Pointer,
    err: ReconcileError,
    requeue_tx: &mpsc::UnboundedSender<ScheduleRequest<Pointer>>,
) {
    match err {
        ReconcileError::NotFound(reason) => debug!(pointer = %ptr, %reason, "dependency not found, soft pass"),
        ReconcileError::SkipReconcile => debug!(pointer = %ptr, "reconcile skipped"),
        ReconcileError::Retryable(source) => {
            let requeue_after = if matches!(source, weave_core::Error::PhaseConflict(_)) {
                PHASE_CONFLICT_REQUEUE
            } else {
                Duration::from_millis(100)
            };
            warn!(pointer = %ptr, %source, ?requeue_after, "retryable store error, requeuing");
            schedule_requeue(requeue_tx, ptr, requeue_after);
        }
        ReconcileError::Requeue(after) => {
            debug!(pointer = %ptr, ?after, "requeue requested");
            schedule_requeue(requeue_tx, ptr, after);
        }
        ReconcileError::DestroyOutput => debug!(pointer = %ptr, "output destruction requested"),
        ReconcileError::Fatal(source) => {
            let delay = runtime.next_restart_delay(&settings.name);
            error!(pointer = %ptr, %source, ?delay, "fatal reconcile error, counted against controller backoff");
        }
    }
}

/// Re-enqueues `ptr` on the same scheduler the watchers feed, `after` from
/// now, so a retry-exhausted conflict or an explicit `Requeue` fires even
/// with no further store events.
fn schedule_requeue(requeue_tx: &mpsc::UnboundedSender<ScheduleRequest<Pointer>>, ptr: &Pointer, after: Duration) {
    let _ = requeue_tx.unbounded_send(ScheduleRequest {
        message: ptr.clone(),
        run_at: tokio::time::Instant::now() + after,
    });
}
