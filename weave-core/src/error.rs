//! The store's error taxonomy.

use crate::metadata::Pointer;
use thiserror::Error;

/// Discriminated store errors, matching spec section 4.1/7 one-to-one.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("resource not found: {0}")]
    NotFound(Pointer),

    #[error("resource already exists: {0}")]
    AlreadyExists(Pointer),

    #[error("version conflict on {pointer}: expected version {expected}, store has {found}")]
    Conflict {
        pointer: Pointer,
        expected: u64,
        found: u64,
    },

    #[error("{0} is tearing down and cannot be mutated without opting in")]
    PhaseConflict(Pointer),

    #[error("{0} is not owned by the requested caller")]
    OwnerConflict(Pointer),

    #[error("invalid operation on {0}: {1}")]
    Invalid(Pointer, String),
}

impl Error {
    /// Whether a controller should retry this write locally with a short
    /// backoff (per spec section 7) rather than treating it as fatal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::PhaseConflict(_))
    }

    #[must_use]
    pub fn pointer(&self) -> &Pointer {
        match self {
            Error::NotFound(p)
            | Error::AlreadyExists(p)
            | Error::Conflict { pointer: p, .. }
            | Error::PhaseConflict(p)
            | Error::OwnerConflict(p)
            | Error::Invalid(p, _) => p,
        }
    }
}
