//! Runtime tuning knobs, deserializable the way `kube_client::Config`
//! structures a client's connection parameters — a plain data struct with
//! sensible defaults and a couple of named constructors, not a CLI.
//!
//! No CLI parsing is added here: the crate ships no binary, the same as the
//! teacher's runtime crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_worker_pool_size() -> usize {
    4
}

fn default_backoff_base() -> Duration {
    Duration::from_millis(100)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(60)
}

fn default_scheduler_debounce() -> Duration {
    Duration::from_millis(20)
}

/// Tuning knobs shared by every controller a [`weave_runtime::Runtime`] drives.
///
/// Per-controller overrides (e.g. a QC's own `concurrency`) live on that
/// controller's own settings struct; this is only the runtime-wide defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default bounded parallelism for a queued controller that doesn't
    /// override `concurrency` itself.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Base delay for a controller's exponential restart backoff.
    #[serde(default = "default_backoff_base", with = "humantime_duration")]
    pub backoff_base: Duration,

    /// Ceiling a controller's restart backoff saturates at.
    #[serde(default = "default_backoff_max", with = "humantime_duration")]
    pub backoff_max: Duration,

    /// How long the event scheduler holds a coalesced event before releasing
    /// it, per [`weave_runtime::scheduler::debounced_scheduler`].
    #[serde(default = "default_scheduler_debounce", with = "humantime_duration")]
    pub scheduler_debounce: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            scheduler_debounce: default_scheduler_debounce(),
        }
    }
}

impl RuntimeConfig {
    /// A config tuned down for tests: short backoffs, no debounce wait.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            worker_pool_size: 2,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(50),
            scheduler_debounce: Duration::from_millis(1),
        }
    }
}

/// `serde(with)` module for `Duration` fields, since `serde` has no built-in
/// human-readable duration format (config files write `"250ms"`/`"5s"`, not
/// a `{secs, nanos}` struct).
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        humantime::format_duration(*value).to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RuntimeConfig::default();
        assert_eq!(config.worker_pool_size, 4);
        assert!(config.backoff_base < config.backoff_max);
    }

    #[test]
    fn round_trips_through_json_with_human_readable_durations() {
        let config = RuntimeConfig::for_tests();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"1ms\""));
        let restored: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.worker_pool_size, config.worker_pool_size);
        assert_eq!(restored.backoff_base, config.backoff_base);
    }
}
