//! Controller adapters: [`sequential`] and [`queued`] (spec sections 4.3/4.4).

pub mod queued;
pub mod sequential;

use crate::input::{InputSpec, Linkage};
use crate::runtime::Runtime;
use futures::future::ready;
use futures::stream::{select_all, BoxStream};
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use weave_core::{Store, WatchEvent};

/// Merge the watch streams of several declared inputs in one namespace into
/// one stream, the way a controller's merged "inputs" channel is built, each
/// filtered per its own [`Linkage`] (a `Weak` input is still watchable
/// directly but never feeds this trigger stream).
pub fn merge_watches(store: &dyn Store, namespace: &str, inputs: &[InputSpec]) -> BoxStream<'static, WatchEvent> {
    let streams = inputs.iter().map(|input| {
        let linkage = input.linkage;
        store
            .watch(namespace, &input.kind, None)
            .filter(move |event| ready(linkage_triggers(linkage, event)))
    });
    select_all(streams).boxed()
}

/// Whether an event on a [`Linkage`]-tagged input should drive a reconcile:
/// `Weak` never does, `DestroyReady`/`MappedDestroyReady` only once the
/// event's resource has no finalizers left of its own, and every other
/// variant always does.
pub(crate) fn linkage_triggers(linkage: Linkage, event: &WatchEvent) -> bool {
    match linkage {
        Linkage::Weak => false,
        Linkage::DestroyReady | Linkage::MappedDestroyReady => event.resource().metadata.is_destroy_ready(),
        Linkage::Strong | Linkage::Primary | Linkage::Mapped => true,
    }
}

/// Run `body` in a loop, restarting it under the controller's exponential
/// backoff whenever it returns an error or panics, until `cancel` fires.
///
/// Shared by both adapters: this is the "controller-level restart backoff"
/// half of spec section 4.2; the adapters themselves only decide when a
/// single reconcile cycle has failed badly enough to end the whole `run`.
pub async fn restart_on_failure<F, Fut, E>(name: &str, runtime: &Runtime, cancel: CancellationToken, mut body: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    while !cancel.is_cancelled() {
        let outcome = AssertUnwindSafe(body()).catch_unwind().await;
        if cancel.is_cancelled() {
            break;
        }
        match outcome {
            Ok(Ok(())) => break,
            Ok(Err(err)) => {
                error!(controller = name, %err, "controller run failed, restarting under backoff");
            }
            Err(panic) => {
                let message = panic_message(&panic);
                error!(controller = name, panic = %message, "controller run panicked, restarting under backoff");
            }
        }
        let delay = runtime.next_restart_delay(name);
        warn!(controller = name, ?delay, "waiting before restart");
        tokio::select! {
            () = tokio::time::sleep(delay) => {},
            () = cancel.cancelled() => break,
        }
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
    use weave_core::{Metadata, Resource};

    #[derive(Debug, Clone)]
    struct Widget;

    fn created(tearing_down: bool, finalizers: &[&str]) -> WatchEvent {
        let mut metadata = Metadata::new("ns", "Widget", "a");
        if tearing_down {
            metadata.phase = weave_core::Phase::TearingDown;
        }
        metadata.finalizers = finalizers.iter().map(|f| (*f).to_string()).collect();
        WatchEvent::Created(Resource::new(metadata, Widget))
    }

    #[test]
    fn weak_never_triggers() {
        assert!(!linkage_triggers(Linkage::Weak, &created(true, &[])));
        assert!(!linkage_triggers(Linkage::Weak, &created(false, &[])));
    }

    #[test]
    fn strong_primary_and_mapped_always_trigger() {
        for linkage in [Linkage::Strong, Linkage::Primary, Linkage::Mapped] {
            assert!(linkage_triggers(linkage, &created(false, &[])));
            assert!(linkage_triggers(linkage, &created(true, &["f"])));
        }
    }

    #[test]
    fn destroy_ready_variants_wait_for_no_finalizers_while_tearing_down() {
        for linkage in [Linkage::DestroyReady, Linkage::MappedDestroyReady] {
            assert!(!linkage_triggers(linkage, &created(false, &[])));
            assert!(!linkage_triggers(linkage, &created(true, &["f"])));
            assert!(linkage_triggers(linkage, &created(true, &[])));
        }
    }
}
