//! The collaborator the scheduler drives.

use async_trait::async_trait;

use crate::{TaskId, TaskSnapshot};

/// Loads schedule state and performs task executions on behalf of the
/// scheduler.
///
/// Implementations absorb their own failures (for example by recording them
/// on the task) so that nothing escapes into the scheduling loop.
#[async_trait]
pub trait Executing: Send + Sync {
    /// Snapshot every task, computing a missing next run time exactly once.
    ///
    /// A task that already has a next run time must be returned with that
    /// time unchanged.
    async fn load_task_snapshots(&self) -> Vec<TaskSnapshot>;

    /// Run a task and record the outcome.
    async fn execute(&self, task_id: &TaskId);
}
