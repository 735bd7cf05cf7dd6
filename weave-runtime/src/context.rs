//! Shared read-only state handed to controller bodies, plus cancellation.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use weave_core::{Pointer, Store, WatchEvent};

/// Arbitrary shared, read-only state passed through to a controller's
/// `run`/`transform` callbacks. Mirrors kube-runtime's `Context<T>`: a cheap
/// `Clone` over an `Arc`, so it can be captured by many concurrent tasks
/// without lifetime gymnastics.
#[derive(Debug)]
pub struct Context<T>(Arc<T>);

impl<T> Context<T> {
    #[must_use]
    pub fn new(state: T) -> Self {
        Self(Arc::new(state))
    }

    #[must_use]
    pub fn get_ref(&self) -> &T {
        self.0.as_ref()
    }

    #[must_use]
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> std::ops::Deref for Context<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.0.as_ref()
    }
}

/// A [`CancellationToken`] derived from a resource's lifecycle: canceled the
/// moment the watched resource enters `tearingDown` (or is destroyed). Used
/// to abort in-flight network work for a target that has become moot,
/// without the caller needing to poll the store itself.
#[derive(Clone)]
pub struct ContextWithTeardown {
    token: CancellationToken,
}

impl ContextWithTeardown {
    /// Spawn a background watcher that cancels `token` once `pointer` enters
    /// `tearingDown` or is destroyed. The watcher exits on its own once that
    /// happens, or if `parent` is canceled first.
    #[must_use]
    pub fn watch(store: Arc<dyn Store>, pointer: Pointer, parent: CancellationToken) -> Self {
        let token = parent.child_token();
        let watch_token = token.clone();
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut events =
                store.watch(&pointer.namespace, &pointer.kind, None);
            loop {
                tokio::select! {
                    _ = watch_token.cancelled() => break,
                    event = events.next() => {
                        let Some(event) = event else { break };
                        if event.pointer() != pointer {
                            continue;
                        }
                        let tearing_down = match &event {
                            WatchEvent::Created(r) => r.metadata.phase.is_tearing_down(),
                            WatchEvent::Updated { after, .. } => after.metadata.phase.is_tearing_down(),
                            WatchEvent::Destroyed(_) => true,
                        };
                        if tearing_down {
                            watch_token.cancel();
                            break;
                        }
                    }
                }
            }
        });
        Self { token }
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
