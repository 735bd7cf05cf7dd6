//! Task Runner: supervises a dynamic set of keyed background tasks (spec
//! section 4.6).
//!
//! Grounded on two patterns already in this crate: panic-isolated restart
//! under backoff (the same shape as [`crate::controller::restart_on_failure`],
//! but with a backoff local to each task rather than shared across a whole
//! controller), and reference- vs. value-equality change detection, which
//! mirrors why `controller::queued`'s mappers come in prebuilt flavors rather
//! than one generic shape.

use crate::backoff::RestartBackoff;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// The body of one keyed task. Receives its key, its current spec, a token
/// cancelled when the task is being stopped or restarted, and a channel to
/// publish progress updates on.
pub type TaskBody<S, N> =
    Arc<dyn Fn(String, Arc<S>, CancellationToken, UnboundedSender<N>) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Decides whether a task should be restarted when its expected spec
/// changes from one reconcile cycle to the next.
pub trait ChangeDetector<S>: Send + Sync + 'static {
    fn changed(&self, old: &Arc<S>, new: &Arc<S>) -> bool;
}

/// Structural equality: restart only when the spec's value actually differs.
pub struct ByValue;

impl<S: PartialEq> ChangeDetector<S> for ByValue {
    fn changed(&self, old: &Arc<S>, new: &Arc<S>) -> bool {
        **old != **new
    }
}

/// Reference equality: restart whenever the caller hands back a distinct
/// `Arc`, even if its contents are equal. The default, matching callers that
/// rebuild their expected map from scratch every cycle and don't want to pay
/// for (or can't implement) `PartialEq`.
pub struct ByRef;

impl<S> ChangeDetector<S> for ByRef {
    fn changed(&self, old: &Arc<S>, new: &Arc<S>) -> bool {
        !Arc::ptr_eq(old, new)
    }
}

struct RunningTask<S> {
    spec: Arc<S>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervises a `{key -> spec}` map, starting, restarting, and cancelling
/// background tasks to keep the running set matching the expected one.
pub struct TaskRunner<S, D, N> {
    body: TaskBody<S, N>,
    detector: D,
    backoff_base: Duration,
    backoff_max: Duration,
    tasks: HashMap<String, RunningTask<S>>,
}

impl<S, N> TaskRunner<S, ByValue, N>
where
    S: PartialEq + Send + Sync + 'static,
    N: Send + 'static,
{
    #[must_use]
    pub fn with_value_equality(body: TaskBody<S, N>, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self::new(body, ByValue, backoff_base, backoff_max)
    }
}

impl<S, N> TaskRunner<S, ByRef, N>
where
    S: Send + Sync + 'static,
    N: Send + 'static,
{
    #[must_use]
    pub fn with_reference_equality(body: TaskBody<S, N>, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self::new(body, ByRef, backoff_base, backoff_max)
    }
}

impl<S, D, N> TaskRunner<S, D, N>
where
    S: Send + Sync + 'static,
    D: ChangeDetector<S>,
    N: Send + 'static,
{
    #[must_use]
    pub fn new(body: TaskBody<S, N>, detector: D, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            body,
            detector,
            backoff_base,
            backoff_max,
            tasks: HashMap::new(),
        }
    }

    /// Reconcile the running set against `expected`: start new keys, cancel
    /// and await removed ones, and restart ones whose spec changed per this
    /// runner's [`ChangeDetector`]. `notify` is handed to every task body
    /// (fresh tasks and restarts alike) for progress reporting.
    pub async fn reconcile(&mut self, expected: &HashMap<String, Arc<S>>, notify: &UnboundedSender<N>) {
        let removed: Vec<String> = self.tasks.keys().filter(|k| !expected.contains_key(*k)).cloned().collect();
        for key in removed {
            self.stop_task(&key).await;
        }

        for (key, spec) in expected {
            match self.tasks.get(key) {
                None => self.start_task(key.clone(), spec.clone(), notify.clone()),
                Some(running) if self.detector.changed(&running.spec, spec) => {
                    self.stop_task(key).await;
                    self.start_task(key.clone(), spec.clone(), notify.clone());
                }
                Some(_) => {}
            }
        }
    }

    fn start_task(&mut self, key: String, spec: Arc<S>, notify: UnboundedSender<N>) {
        let cancel = CancellationToken::new();
        let body = self.body.clone();
        let backoff_base = self.backoff_base;
        let backoff_max = self.backoff_max;
        let task_key = key.clone();
        let task_cancel = cancel.clone();
        let task_spec = spec.clone();
        let handle = tokio::spawn(async move {
            let mut backoff = RestartBackoff::new(backoff_base, backoff_max);
            while !task_cancel.is_cancelled() {
                let fut = (body)(task_key.clone(), task_spec.clone(), task_cancel.clone(), notify.clone());
                let outcome = AssertUnwindSafe(fut).catch_unwind().await;
                if task_cancel.is_cancelled() {
                    break;
                }
                match outcome {
                    Ok(Ok(())) => break,
                    Ok(Err(err)) => error!(task = %task_key, %err, "task failed, restarting under backoff"),
                    Err(panic) => {
                        let message = panic_message(&panic);
                        error!(task = %task_key, panic = %message, "task panicked, restarting under backoff");
                    }
                }
                let delay = backoff.next_delay();
                warn!(task = %task_key, ?delay, "waiting before task restart");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {},
                    () = task_cancel.cancelled() => break,
                }
            }
        });
        self.tasks.insert(key, RunningTask { spec, cancel, handle });
    }

    async fn stop_task(&mut self, key: &str) {
        if let Some(task) = self.tasks.remove(key) {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }

    /// Cancel and await every running task.
    pub async fn stop(&mut self) {
        let keys: Vec<String> = self.tasks.keys().cloned().collect();
        for key in keys {
            self.stop_task(&key).await;
        }
    }

    #[must_use]
    pub fn running_keys(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn expected(pairs: &[(&str, u32)]) -> HashMap<String, Arc<u32>> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), Arc::new(*v))).collect()
    }

    #[tokio::test]
    async fn starts_and_stops_tasks_to_match_expected_set() {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::unbounded_channel::<()>();

        let starts_c = starts.clone();
        let stops_c = stops.clone();
        let body: TaskBody<u32, ()> = Arc::new(move |_key, _spec, cancel, _notify| {
            let starts = starts_c.clone();
            let stops = stops_c.clone();
            async move {
                starts.fetch_add(1, Ordering::SeqCst);
                cancel.cancelled().await;
                stops.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });

        let mut runner = TaskRunner::with_value_equality(body, Duration::from_millis(5), Duration::from_millis(50));
        runner.reconcile(&expected(&[("a", 1), ("b", 1)]), &tx).await;
        tokio::task::yield_now().await;
        assert_eq!(runner.running_keys().len(), 2);

        runner.reconcile(&expected(&[("a", 1)]), &tx).await;
        assert_eq!(runner.running_keys(), vec!["a".to_string()]);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        runner.stop().await;
        assert!(runner.running_keys().is_empty());
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn value_equality_restarts_only_on_changed_spec() {
        let restarts = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::unbounded_channel::<()>();
        let restarts_c = restarts.clone();
        let body: TaskBody<u32, ()> = Arc::new(move |_key, _spec, cancel, _notify| {
            let restarts = restarts_c.clone();
            async move {
                restarts.fetch_add(1, Ordering::SeqCst);
                cancel.cancelled().await;
                Ok(())
            }
            .boxed()
        });

        let mut runner = TaskRunner::with_value_equality(body, Duration::from_millis(5), Duration::from_millis(50));
        runner.reconcile(&expected(&[("a", 1)]), &tx).await;
        tokio::task::yield_now().await;
        assert_eq!(restarts.load(Ordering::SeqCst), 1);

        // Same value, fresh Arc: value-equality runner must not restart.
        runner.reconcile(&expected(&[("a", 1)]), &tx).await;
        tokio::task::yield_now().await;
        assert_eq!(restarts.load(Ordering::SeqCst), 1);

        // Changed value: must restart.
        runner.reconcile(&expected(&[("a", 2)]), &tx).await;
        tokio::task::yield_now().await;
        assert_eq!(restarts.load(Ordering::SeqCst), 2);

        runner.stop().await;
    }

    #[tokio::test]
    async fn reference_equality_restarts_even_on_equal_value() {
        let restarts = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::unbounded_channel::<()>();
        let restarts_c = restarts.clone();
        let body: TaskBody<u32, ()> = Arc::new(move |_key, _spec, cancel, _notify| {
            let restarts = restarts_c.clone();
            async move {
                restarts.fetch_add(1, Ordering::SeqCst);
                cancel.cancelled().await;
                Ok(())
            }
            .boxed()
        });

        let mut runner = TaskRunner::with_reference_equality(body, Duration::from_millis(5), Duration::from_millis(50));
        runner.reconcile(&expected(&[("a", 1)]), &tx).await;
        tokio::task::yield_now().await;
        assert_eq!(restarts.load(Ordering::SeqCst), 1);

        // A fresh Arc with an equal value still counts as changed.
        runner.reconcile(&expected(&[("a", 1)]), &tx).await;
        tokio::task::yield_now().await;
        assert_eq!(restarts.load(Ordering::SeqCst), 2);

        runner.stop().await;
    }
}
