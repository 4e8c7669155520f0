//! Dispatch configuration.

use crate::error::{ArenaError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upper bound on concurrently running tasks.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
/// Default per-task wall-clock timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(180);
/// Default upper bound on repeats per provider in one batch.
pub const DEFAULT_MAX_REPEAT: u32 = 5;

/// Resource and failure-handling knobs for a [`DispatchCoordinator`].
///
/// Pool width is a resource-control knob only: a batch behaves the same
/// with any width, it just runs fewer tasks at once.
///
/// [`DispatchCoordinator`]: crate::DispatchCoordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of tasks running at once, per batch.
    pub max_concurrency: usize,
    /// Per-task timeout applied when a batch request does not set one.
    #[serde(rename = "task_timeout_secs", with = "duration_secs")]
    pub task_timeout: Duration,
    /// Maximum repeat count accepted for a single provider.
    pub max_repeat: u32,
    /// Retries on transient provider errors (rate limits, network).
    pub max_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            max_repeat: DEFAULT_MAX_REPEAT,
            max_retries: 0,
        }
    }
}

impl DispatchConfig {
    /// Checks that every knob is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(ArenaError::Config("max_concurrency must be at least 1".into()));
        }
        if self.max_repeat == 0 {
            return Err(ArenaError::Config("max_repeat must be at least 1".into()));
        }
        if self.task_timeout.is_zero() {
            return Err(ArenaError::Config("task_timeout must be positive".into()));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
