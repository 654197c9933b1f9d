//! Error types for task storage and schedule math.

use thiserror::Error;

use cadence_scheduler::TaskId;

/// Errors from computing a schedule's next occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Interval schedules must be at least one second.
    #[error("interval must be greater than 0 seconds")]
    InvalidInterval,

    /// Cron expression could not be parsed.
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// The schedule has no occurrence after the anchor time.
    #[error("schedule has no future occurrence")]
    Exhausted,

    /// The next occurrence does not fit in a timestamp.
    #[error("next occurrence is out of range")]
    OutOfRange,
}

/// Errors that can occur in task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Invalid schedule.
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),

    /// Task not found.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Store file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store file could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
