//! Task and run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cadence_scheduler::{TaskId, TaskSnapshot};

/// A user-defined task and its schedule state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique task ID.
    pub id: TaskId,
    /// Human-readable name.
    pub name: String,
    /// Work handed to the runner on each execution.
    pub prompt: String,
    /// When/how often to run this task.
    pub schedule: TaskSchedule,
    /// Disabled tasks are never dispatched.
    pub is_enabled: bool,
    /// When this task is next due. `None` until first computed, or once a
    /// one-shot task has run.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Trigger time of the last successful run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Error from the last run or schedule computation.
    pub last_error: Option<String>,
    /// Set when the schedule itself produced no next run. Unlike a failed
    /// run, this keeps the task unscheduled until it is edited or re-enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_error: Option<String>,
    /// When this task was created.
    pub created_at: DateTime<Utc>,
    /// When this task's definition last changed.
    pub updated_at: DateTime<Utc>,
}

/// How a task is scheduled to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskSchedule {
    /// Run once at a specific time.
    Once { at: DateTime<Utc> },
    /// Run every N seconds, measured from the previous trigger.
    Interval { seconds: u64 },
    /// Run on a cron expression (5 or 6 fields).
    Cron { expression: String },
}

impl TaskSchedule {
    /// Whether this schedule can produce more than one occurrence.
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::Once { .. })
    }
}

impl ScheduledTask {
    /// Create a new enabled task. The next run time is computed on first
    /// observation by the executor.
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, schedule: TaskSchedule) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(Uuid::new_v4().to_string()),
            name: name.into(),
            prompt: prompt.into(),
            schedule,
            is_enabled: true,
            next_run_at: None,
            last_run_at: None,
            last_error: None,
            schedule_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The scheduling-relevant view of this task.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            next_run_at: self.next_run_at,
            is_enabled: self.is_enabled,
        }
    }

    /// Whether the executor should compute a next run time for this task.
    ///
    /// Tasks whose schedule failed stay unscheduled until they are edited.
    /// A failed run does not block scheduling.
    pub fn needs_next_run(&self) -> bool {
        self.is_enabled && self.next_run_at.is_none() && self.schedule_error.is_none()
    }
}

/// Outcome of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Work was handed to the runner successfully.
    Submitted,
    /// The runner reported a failure.
    Failed,
}

/// Append-only record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTaskRun {
    /// Unique run ID.
    pub id: Uuid,
    /// Task that ran.
    pub task_id: TaskId,
    /// When the execution started.
    pub triggered_at: DateTime<Utc>,
    /// Outcome.
    pub status: RunStatus,
    /// Session created by the runner, on success.
    pub session_id: Option<String>,
    /// Failure message, on failure.
    pub error_message: Option<String>,
    /// Milliseconds from trigger to completion.
    pub duration_ms: u64,
}

impl ScheduledTaskRun {
    /// Record a successful submission.
    pub fn submitted(
        task_id: TaskId,
        triggered_at: DateTime<Utc>,
        session_id: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            triggered_at,
            status: RunStatus::Submitted,
            session_id: Some(session_id),
            error_message: None,
            duration_ms,
        }
    }

    /// Record a failed attempt.
    pub fn failed(
        task_id: TaskId,
        triggered_at: DateTime<Utc>,
        error_message: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            triggered_at,
            status: RunStatus::Failed,
            session_id: None,
            error_message: Some(error_message),
            duration_ms,
        }
    }
}
