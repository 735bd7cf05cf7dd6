//! The reconcile-outcome error taxonomy (spec section 7).

use std::time::Duration;
use thiserror::Error;
use weave_core::Error as StoreError;

/// The outcome a controller's `reconcile`/`transform` body can signal besides
/// plain success.
///
/// Unlike [`weave_core::Error`], which is about store-write admission, this
/// is about what the *scheduler* should do next. `From<weave_core::Error>` is
/// implemented so controllers can just `?` a store call and let retryable
/// store errors fold into the same retry machinery as everything else.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The dependency this reconcile needed isn't present yet. Treated as a
    /// soft pass: logged at debug, no backoff penalty, no requeue beyond the
    /// normal watch.
    #[error("dependency not found: {0}")]
    NotFound(#[from] NotFoundReason),

    /// A version or phase race with another writer. Retried locally with a
    /// short backoff, up to a small bound, before counting against the
    /// controller's restart backoff.
    #[error("retryable store conflict: {0}")]
    Retryable(#[source] StoreError),

    /// Silently re-enter the queue; only a new event will wake it again. No
    /// log, no backoff.
    #[error("reconcile skipped")]
    SkipReconcile,

    /// Tear down and destroy the QC's output and clear any output-specific
    /// state.
    #[error("output destruction requested")]
    DestroyOutput,

    /// Schedule a timed re-enqueue regardless of whether a new event arrives.
    #[error("requeue requested after {0:?}")]
    Requeue(Duration),

    /// Everything else. Logged at error level and counted against the
    /// controller's restart backoff.
    #[error("fatal reconcile error: {0}")]
    Fatal(#[source] anyhow_lite::BoxError),
}

/// A minimal boxed-error wrapper so `Fatal` can carry any `std::error::Error`
/// without the crate depending on `anyhow` just for this one variant.
mod anyhow_lite {
    pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
}

impl ReconcileError {
    /// Wrap an arbitrary error as [`ReconcileError::Fatal`].
    pub fn fatal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        ReconcileError::Fatal(Box::new(err))
    }

    /// Whether this should be retried immediately (bounded) rather than
    /// going through the controller's restart backoff.
    #[must_use]
    pub fn is_locally_retryable(&self) -> bool {
        matches!(self, ReconcileError::Retryable(_))
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound(ptr) => ReconcileError::NotFound(NotFoundReason(ptr.to_string())),
            StoreError::Conflict { .. } | StoreError::PhaseConflict(_) => ReconcileError::Retryable(err),
            _ => ReconcileError::Fatal(Box::new(err)),
        }
    }
}

/// Carries just enough context to log why a dependency lookup came back
/// empty, without holding onto the whole [`weave_core::Error`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct NotFoundReason(pub String);
