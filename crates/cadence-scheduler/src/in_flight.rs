//! Tracking of task executions that have not yet finished.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::TaskId;

/// Set of task IDs whose execution is currently running.
///
/// Shared by the scheduling loop and manual triggers, so at most one
/// execution per task exists at any time.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<TaskId>>>,
}

impl InFlight {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as running.
    ///
    /// Returns `None` if it is already running. The marker is cleared when
    /// the returned guard is dropped.
    pub fn try_claim(&self, id: &TaskId) -> Option<InFlightGuard> {
        if !self.lock().insert(id.clone()) {
            return None;
        }

        Some(InFlightGuard {
            ids: Arc::clone(&self.ids),
            id: id.clone(),
        })
    }

    /// Whether `id` is currently running.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.lock().contains(id)
    }

    /// Number of running executions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is running.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// IDs currently running, sorted.
    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<TaskId>> {
        // The set is only touched by insert/remove, so a poisoned lock still
        // holds a consistent value.
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears its task's in-flight marker on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<TaskId>>>,
    id: TaskId,
}

impl InFlightGuard {
    /// The task this guard holds.
    pub fn task_id(&self) -> &TaskId {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.remove(&self.id);
    }
}
