//! Scheduler configuration.

use std::time::Duration;

/// Default sleep when no task is scheduled at all.
pub const DEFAULT_IDLE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default upper bound on a single sleep while waiting for a due time.
pub const DEFAULT_MAX_SLEEP_CHUNK: Duration = Duration::from_secs(30);

/// Configuration for the scheduler loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long to sleep when no enabled task has a next run time.
    pub idle_poll_interval: Duration,
    /// Longest single sleep while waiting for the next due task.
    pub max_sleep_chunk: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval: DEFAULT_IDLE_POLL_INTERVAL,
            max_sleep_chunk: DEFAULT_MAX_SLEEP_CHUNK,
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle poll interval.
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    /// Set the maximum sleep chunk.
    pub fn with_max_sleep_chunk(mut self, chunk: Duration) -> Self {
        self.max_sleep_chunk = chunk;
        self
    }
}
