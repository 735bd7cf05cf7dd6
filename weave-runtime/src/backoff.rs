//! Per-controller exponential restart backoff.
//!
//! Plays the role kube-runtime's `StreamBackoff` plays for a failing watch
//! stream, but scoped to one controller's restart schedule rather than a
//! single stream adaptor, since the runtime drives many controllers off one
//! scheduler.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

/// Tracks the exponential backoff state for a single registered controller.
///
/// `reset()` is the explicit `reset_backoff` API (see DESIGN.md open
/// question): the runtime never infers success from a reconcile returning
/// `Ok`, a controller must call it deliberately.
pub struct RestartBackoff {
    builder: ExponentialBuilder,
    current: Box<dyn Iterator<Item = Duration> + Send>,
    max_delay: Duration,
}

impl RestartBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        let builder = ExponentialBuilder::default()
            .with_min_delay(base)
            .with_max_delay(max)
            .without_max_times();
        Self {
            current: Box::new(builder.build()),
            builder,
            max_delay: max,
        }
    }

    /// The delay to wait before the next restart attempt. Saturates at the
    /// configured maximum once the exponential schedule is exhausted.
    pub fn next_delay(&mut self) -> Duration {
        self.current.next().unwrap_or(self.max_delay)
    }

    /// Forget all accumulated backoff state; the next `next_delay()` starts
    /// again from the base delay.
    pub fn reset(&mut self) {
        self.current = Box::new(self.builder.build());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_then_saturate_at_max() {
        let mut backoff = RestartBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        assert!(second >= first);
        for _ in 0..20 {
            assert!(backoff.next_delay() <= Duration::from_secs(1));
        }
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut backoff = RestartBackoff::new(Duration::from_millis(50), Duration::from_secs(10));
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        let after_reset = backoff.next_delay();
        assert!(after_reset <= Duration::from_millis(200));
    }
}
