//! Executor that connects the scheduler to storage and a task runner.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use cadence_scheduler::{Clock, Executing, SystemClock, TaskId, TaskSnapshot};

use crate::{
    NextRunCalculator, ScheduleCalculator, ScheduleError, ScheduledTask, ScheduledTaskRun,
    TaskError, TaskRunner, TaskSchedule, TaskStore,
};

/// Definition of a task to create.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub prompt: String,
    pub schedule: TaskSchedule,
    pub is_enabled: bool,
}

/// Edits to an existing task. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub schedule: Option<TaskSchedule>,
}

/// Loads snapshots for the scheduler and performs executions.
///
/// Every read-modify-write of a task record goes through an internal lock,
/// which is never held while the runner is working.
pub struct ScheduledTaskExecutor {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn TaskRunner>,
    calculator: Arc<dyn NextRunCalculator>,
    clock: Arc<dyn Clock>,
    failure_retry_delay: Option<chrono::Duration>,
    write_lock: Mutex<()>,
}

impl ScheduledTaskExecutor {
    /// Create an executor using the standard calculator and system clock.
    pub fn new(store: Arc<dyn TaskStore>, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            store,
            runner,
            calculator: Arc::new(ScheduleCalculator),
            clock: Arc::new(SystemClock),
            failure_retry_delay: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Use a different schedule calculator.
    pub fn with_calculator(mut self, calculator: Arc<dyn NextRunCalculator>) -> Self {
        self.calculator = calculator;
        self
    }

    /// Use a different clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// After a failed run, hold the task back until at least this long after
    /// the failed trigger. Without it a failed task stays due and is retried
    /// on the next scheduler pass.
    pub fn with_failure_retry_delay(mut self, delay: chrono::Duration) -> Self {
        self.failure_retry_delay = Some(delay);
        self
    }

    /// Create a task after validating its schedule.
    #[tracing::instrument(skip_all, fields(name = %new.name))]
    pub async fn create_task(&self, new: NewTask) -> Result<ScheduledTask, TaskError> {
        let now = self.clock.now();
        self.calculator.validate(&new.schedule, now)?;

        let mut task = ScheduledTask::new(new.name, new.prompt, new.schedule);
        task.is_enabled = new.is_enabled;
        task.created_at = now;
        task.updated_at = now;

        let _guard = self.write_lock.lock().await;
        self.store.save_task(&task).await?;
        info!(task_id = %task.id, "created task");
        Ok(task)
    }

    /// Edit a task. Changing the schedule clears the next run time and any
    /// recorded error so it is recomputed on the next snapshot.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_task(
        &self,
        id: &TaskId,
        update: TaskUpdate,
    ) -> Result<ScheduledTask, TaskError> {
        let now = self.clock.now();
        if let Some(schedule) = &update.schedule {
            self.calculator.validate(schedule, now)?;
        }

        let _guard = self.write_lock.lock().await;
        let mut task = self.require_task(id).await?;

        if let Some(name) = update.name {
            task.name = name;
        }
        if let Some(prompt) = update.prompt {
            task.prompt = prompt;
        }
        if let Some(schedule) = update.schedule.filter(|s| *s != task.schedule) {
            task.schedule = schedule;
            task.next_run_at = None;
            task.last_error = None;
            task.schedule_error = None;
        }
        task.updated_at = now;

        self.store.save_task(&task).await?;
        info!(task_id = %id, "updated task");
        Ok(task)
    }

    /// Enable or disable a task. Re-enabling recomputes the next run time.
    #[tracing::instrument(skip(self))]
    pub async fn set_enabled(&self, id: &TaskId, enabled: bool) -> Result<ScheduledTask, TaskError> {
        let _guard = self.write_lock.lock().await;
        let mut task = self.require_task(id).await?;

        if enabled && !task.is_enabled {
            task.next_run_at = None;
            task.last_error = None;
            task.schedule_error = None;
        }
        task.is_enabled = enabled;
        task.updated_at = self.clock.now();

        self.store.save_task(&task).await?;
        info!(task_id = %id, enabled, "changed task enablement");
        Ok(task)
    }

    /// Delete a task and its run history.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), TaskError> {
        let _guard = self.write_lock.lock().await;
        if !self.store.delete_task(id).await? {
            return Err(TaskError::TaskNotFound(id.clone()));
        }
        info!(task_id = %id, "deleted task");
        Ok(())
    }

    /// Look up a task.
    pub async fn get_task(&self, id: &TaskId) -> Result<ScheduledTask, TaskError> {
        self.require_task(id).await
    }

    /// All tasks, in creation order.
    pub async fn list_tasks(&self) -> Result<Vec<ScheduledTask>, TaskError> {
        self.store.list_tasks().await
    }

    /// Most recent runs of a task, newest first.
    pub async fn list_runs(
        &self,
        id: &TaskId,
        limit: usize,
    ) -> Result<Vec<ScheduledTaskRun>, TaskError> {
        self.store.list_runs(id, limit).await
    }

    async fn require_task(&self, id: &TaskId) -> Result<ScheduledTask, TaskError> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| TaskError::TaskNotFound(id.clone()))
    }

    /// Compute missing next run times, persist them, and snapshot every task.
    async fn try_load_snapshots(&self) -> Result<Vec<TaskSnapshot>, TaskError> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.store.list_tasks().await?;
        let now = self.clock.now();

        for task in tasks.iter_mut().filter(|t| t.needs_next_run()) {
            match self.calculator.next_run(&task.schedule, now) {
                Ok(next_run_at) => {
                    debug!(task_id = %task.id, next_run_at = %next_run_at, "computed first run time");
                    task.next_run_at = Some(next_run_at);
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "cannot schedule task");
                    let message = format!("schedule error: {e}");
                    task.last_error = Some(message.clone());
                    task.schedule_error = Some(message);
                }
            }
            self.store.save_task(task).await?;
        }

        Ok(tasks.iter().map(ScheduledTask::snapshot).collect())
    }

    /// Apply a run's outcome to the live task record and append the run.
    async fn record_outcome(
        &self,
        id: &TaskId,
        triggered_at: DateTime<Utc>,
        duration_ms: u64,
        outcome: Result<String, String>,
    ) -> Result<(), TaskError> {
        {
            let _guard = self.write_lock.lock().await;
            // Re-read: the task may have been edited while the runner worked.
            match self.store.get_task(id).await? {
                Some(mut task) => {
                    self.apply_outcome(&mut task, triggered_at, &outcome);
                    self.store.save_task(&task).await?;
                }
                None => warn!(task_id = %id, "task deleted during execution"),
            }
        }

        let run = match outcome {
            Ok(session_id) => ScheduledTaskRun::submitted(id.clone(), triggered_at, session_id, duration_ms),
            Err(message) => ScheduledTaskRun::failed(id.clone(), triggered_at, message, duration_ms),
        };
        self.store.append_run(&run).await
    }

    fn apply_outcome(
        &self,
        task: &mut ScheduledTask,
        triggered_at: DateTime<Utc>,
        outcome: &Result<String, String>,
    ) {
        match outcome {
            Ok(session_id) => {
                task.last_run_at = Some(triggered_at);
                task.last_error = None;

                match self.calculator.next_run(&task.schedule, triggered_at) {
                    Ok(next_run_at) => {
                        task.next_run_at = Some(next_run_at);
                        task.schedule_error = None;
                        info!(task_id = %task.id, session_id = %session_id, next_run_at = %next_run_at, "task submitted");
                    }
                    Err(ScheduleError::Exhausted) => {
                        task.next_run_at = None;
                        task.is_enabled = false;
                        info!(task_id = %task.id, session_id = %session_id, "task submitted, schedule exhausted, disabling");
                    }
                    Err(e) => {
                        let message = format!("schedule error: {e}");
                        task.next_run_at = None;
                        task.last_error = Some(message.clone());
                        task.schedule_error = Some(message);
                        warn!(task_id = %task.id, error = %e, "task submitted but cannot be rescheduled");
                    }
                }
            }
            Err(message) => {
                task.last_error = Some(message.clone());
                if let (Some(delay), Some(next_run_at)) = (self.failure_retry_delay, task.next_run_at) {
                    task.next_run_at = Some(next_run_at.max(triggered_at + delay));
                }
                warn!(task_id = %task.id, error = %message, next_run_at = ?task.next_run_at, "task run failed");
            }
        }
    }
}

#[async_trait]
impl Executing for ScheduledTaskExecutor {
    async fn load_task_snapshots(&self) -> Vec<TaskSnapshot> {
        match self.try_load_snapshots().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!(error = %e, "failed to load task snapshots");
                Vec::new()
            }
        }
    }

    #[tracing::instrument(skip_all, fields(task_id = %task_id))]
    async fn execute(&self, task_id: &TaskId) {
        let task = match self.store.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!("task no longer exists, skipping execution");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to load task for execution");
                return;
            }
        };

        if !task.is_enabled {
            info!("task disabled since dispatch, skipping execution");
            return;
        }

        let triggered_at = self.clock.now();
        info!(name = %task.name, "executing task");
        let outcome = self.runner.submit(&task).await;
        let duration_ms = (self.clock.now() - triggered_at).num_milliseconds().max(0) as u64;

        if let Err(e) = self
            .record_outcome(task_id, triggered_at, duration_ms, outcome)
            .await
        {
            error!(error = %e, "failed to record task run");
        }
    }
}
