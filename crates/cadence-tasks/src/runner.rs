//! The side effect performed when a task fires.

use async_trait::async_trait;

use crate::ScheduledTask;

/// Submits a task's work somewhere (an agent backend, a command, ...).
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Submit `task`. Returns the session ID created for the work, or a
    /// human-readable failure message.
    async fn submit(&self, task: &ScheduledTask) -> Result<String, String>;
}
