//! Durable storage for tasks and their run history.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use cadence_scheduler::TaskId;

use crate::{ScheduledTask, ScheduledTaskRun, TaskError};

/// Default number of runs kept per task.
pub const DEFAULT_RUN_RETENTION: usize = 100;

/// Storage for task records and run history.
///
/// Tasks are returned in insertion order.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks.
    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>, TaskError>;

    /// A single task.
    async fn get_task(&self, id: &TaskId) -> Result<Option<ScheduledTask>, TaskError>;

    /// Insert or replace a task.
    async fn save_task(&self, task: &ScheduledTask) -> Result<(), TaskError>;

    /// Remove a task and its runs. Returns whether it existed.
    async fn delete_task(&self, id: &TaskId) -> Result<bool, TaskError>;

    /// Append a run record.
    async fn append_run(&self, run: &ScheduledTaskRun) -> Result<(), TaskError>;

    /// Most recent runs of a task, newest first.
    async fn list_runs(
        &self,
        task_id: &TaskId,
        limit: usize,
    ) -> Result<Vec<ScheduledTaskRun>, TaskError>;
}

/// Contents of a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    tasks: Vec<ScheduledTask>,
    #[serde(default)]
    runs: Vec<ScheduledTaskRun>,
}

impl StoreData {
    fn get(&self, id: &TaskId) -> Option<ScheduledTask> {
        self.tasks.iter().find(|t| &t.id == id).cloned()
    }

    fn upsert(&mut self, task: &ScheduledTask) {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => self.tasks.push(task.clone()),
        }
    }

    fn delete(&mut self, id: &TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| &t.id != id);
        self.runs.retain(|r| &r.task_id != id);
        self.tasks.len() != before
    }

    fn push_run(&mut self, run: &ScheduledTaskRun, retention: usize) {
        self.runs.push(run.clone());

        let count = self.runs.iter().filter(|r| r.task_id == run.task_id).count();
        let mut excess = count.saturating_sub(retention);
        if excess > 0 {
            // Oldest runs come first.
            self.runs.retain(|r| {
                if excess > 0 && r.task_id == run.task_id {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    fn runs_for(&self, task_id: &TaskId, limit: usize) -> Vec<ScheduledTaskRun> {
        self.runs
            .iter()
            .rev()
            .filter(|r| &r.task_id == task_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

/// In-memory store. Contents are lost when dropped.
#[derive(Debug)]
pub struct MemoryTaskStore {
    data: RwLock<StoreData>,
    run_retention: usize,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            run_retention: DEFAULT_RUN_RETENTION,
        }
    }

    /// Keep at most `retention` runs per task.
    pub fn with_run_retention(mut self, retention: usize) -> Self {
        self.run_retention = retention;
        self
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>, TaskError> {
        Ok(self.data.read().await.tasks.clone())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<ScheduledTask>, TaskError> {
        Ok(self.data.read().await.get(id))
    }

    async fn save_task(&self, task: &ScheduledTask) -> Result<(), TaskError> {
        self.data.write().await.upsert(task);
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<bool, TaskError> {
        Ok(self.data.write().await.delete(id))
    }

    async fn append_run(&self, run: &ScheduledTaskRun) -> Result<(), TaskError> {
        self.data.write().await.push_run(run, self.run_retention);
        Ok(())
    }

    async fn list_runs(
        &self,
        task_id: &TaskId,
        limit: usize,
    ) -> Result<Vec<ScheduledTaskRun>, TaskError> {
        Ok(self.data.read().await.runs_for(task_id, limit))
    }
}

/// Store backed by a single JSON document.
///
/// The file is re-read on every call, so changes written by another process
/// (for example the CLI while the daemon runs) are picked up. Writes go to a
/// temporary file that is then renamed over the original.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    run_retention: usize,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_retention: DEFAULT_RUN_RETENTION,
            write_lock: Mutex::new(()),
        }
    }

    /// Keep at most `retention` runs per task.
    pub fn with_run_retention(mut self, retention: usize) -> Self {
        self.run_retention = retention;
        self
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoreData, TaskError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(StoreData::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreData::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, data: &StoreData) -> Result<(), TaskError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, serde_json::to_vec_pretty(data)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), tasks = data.tasks.len(), "saved task store");
        Ok(())
    }

    /// Load, apply `f`, and write back, serialized against other writers in
    /// this process.
    async fn modify<F, T>(&self, f: F) -> Result<T, TaskError>
    where
        F: FnOnce(&mut StoreData) -> T + Send,
        T: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        let out = f(&mut data);
        self.save(&data).await?;
        Ok(out)
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>, TaskError> {
        Ok(self.load().await?.tasks)
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<ScheduledTask>, TaskError> {
        Ok(self.load().await?.get(id))
    }

    async fn save_task(&self, task: &ScheduledTask) -> Result<(), TaskError> {
        self.modify(|data| data.upsert(task)).await
    }

    async fn delete_task(&self, id: &TaskId) -> Result<bool, TaskError> {
        self.modify(|data| data.delete(id)).await
    }

    async fn append_run(&self, run: &ScheduledTaskRun) -> Result<(), TaskError> {
        let retention = self.run_retention;
        self.modify(|data| data.push_run(run, retention)).await
    }

    async fn list_runs(
        &self,
        task_id: &TaskId,
        limit: usize,
    ) -> Result<Vec<ScheduledTaskRun>, TaskError> {
        Ok(self.load().await?.runs_for(task_id, limit))
    }
}
