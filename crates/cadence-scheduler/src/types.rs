//! Scheduler types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Point-in-time view of the fields the scheduler cares about.
///
/// Taken at the start of every pass so the loop never holds on to the live
/// task record while it sleeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identity.
    pub id: TaskId,
    /// When the task is next due, if known.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Disabled tasks are never due.
    pub is_enabled: bool,
}

impl TaskSnapshot {
    /// Whether this snapshot should be dispatched at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_enabled && self.next_run_at.is_some_and(|at| at <= now)
    }
}
