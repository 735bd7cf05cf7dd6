//! Sequential Controller adapter (spec section 4.3).

use super::{merge_watches, restart_on_failure};
use crate::error::ReconcileError;
use crate::input::{InputSpec, OutputSpec};
use crate::runtime::Runtime;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use weave_core::WatchEvent;

/// A controller with a single event loop and its own `reconcile` body.
///
/// Used when state must persist across reconciles inside the controller
/// instance itself (e.g. a map of active per-cluster watchers) — no
/// concurrency is permitted within `run`, so that state needs no locking.
#[async_trait]
pub trait SequentialController: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn inputs(&self) -> Vec<InputSpec>;
    fn outputs(&self) -> Vec<OutputSpec>;

    /// The controller's whole event loop. Typically loops over
    /// `cancel.cancelled()` and the stream built from [`Self::inputs`] via
    /// [`merge_watches`], calling an internal `reconcile` per event.
    async fn run(&self, cancel: CancellationToken, runtime: Arc<Runtime>) -> Result<(), ReconcileError>;

    /// Convenience for implementors: the merged watch stream over this
    /// controller's declared inputs in `namespace`.
    fn merged_inputs(&self, runtime: &Runtime, namespace: &str) -> BoxStream<'static, WatchEvent> {
        merge_watches(runtime.store().as_ref(), namespace, &self.inputs())
    }
}

/// Register `controller` with `runtime` and drive it until `cancel` fires,
/// restarting its `run` body under the controller's backoff on error or
/// panic.
pub async fn drive(controller: Arc<dyn SequentialController>, runtime: Arc<Runtime>, cancel: CancellationToken) {
    let name = controller.name().to_string();
    runtime
        .register_controller(&name, controller.outputs())
        .expect("sequential controller double-registered");
    restart_on_failure(&name, &runtime, cancel.clone(), || {
        let controller = controller.clone();
        let runtime = runtime.clone();
        let cancel = cancel.child_token();
        async move { controller.run(cancel, runtime).await }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Ownership;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weave_core::MemoryStore;

    struct CountingController {
        runs: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl SequentialController for CountingController {
        fn name(&self) -> &str {
            "counting"
        }

        fn inputs(&self) -> Vec<InputSpec> {
            vec![]
        }

        fn outputs(&self) -> Vec<OutputSpec> {
            vec![OutputSpec::new("Widget", Ownership::Shared)]
        }

        async fn run(&self, _cancel: CancellationToken, _runtime: Arc<Runtime>) -> Result<(), ReconcileError> {
            let count = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && count == 0 {
                return Err(ReconcileError::fatal(std::io::Error::other("boom")));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn restarts_once_after_a_failure_then_stops() {
        let runtime = Arc::new(Runtime::new(
            Arc::new(MemoryStore::new()),
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(10),
        ));
        let runs = Arc::new(AtomicUsize::new(0));
        let controller = Arc::new(CountingController {
            runs: runs.clone(),
            fail_first: true,
        });
        let cancel = CancellationToken::new();
        drive(controller, runtime, cancel).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
