//! Task scheduler implementation.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::plan::{SchedulePass, Wake};
use crate::{Clock, Executing, InFlight, SchedulerConfig, SystemClock, TaskId};

/// State shared between the scheduler handle and its loop.
struct Shared {
    executor: Arc<dyn Executing>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    in_flight: InFlight,
}

impl Shared {
    /// Spawn an execution for `id` unless one is already running.
    fn dispatch(&self, id: &TaskId) -> bool {
        let Some(guard) = self.in_flight.try_claim(id) else {
            debug!(task_id = %id, "task already in flight, not dispatching");
            return false;
        };

        info!(task_id = %id, "dispatching task");
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            executor.execute(guard.task_id()).await;
            drop(guard);
        });
        true
    }
}

/// A running loop and the token that cancels it.
struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct LoopState {
    handle: Option<LoopHandle>,
    generation: u64,
}

impl LoopState {
    fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }
}

/// Background scheduler that dispatches due tasks.
///
/// One loop runs per scheduler. Each pass snapshots the tasks, spawns an
/// execution for every due task that is not already running, then sleeps
/// until the next due time (at most `max_sleep_chunk`) or for the idle poll
/// interval when nothing is scheduled.
///
/// [`start`](Self::start), [`refresh`](Self::refresh) and
/// [`run_now`](Self::run_now) spawn onto the current Tokio runtime.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    state: Mutex<LoopState>,
}

impl TaskScheduler {
    /// Create a scheduler that reads the system clock.
    pub fn new(executor: Arc<dyn Executing>, config: SchedulerConfig) -> Self {
        Self::with_clock(executor, config, Arc::new(SystemClock))
    }

    /// Create a scheduler with an explicit clock.
    pub fn with_clock(
        executor: Arc<dyn Executing>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                executor,
                clock,
                config,
                in_flight: InFlight::new(),
            }),
            state: Mutex::new(LoopState::default()),
        }
    }

    /// The configuration this scheduler was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Whether the loop is currently running.
    pub fn is_running(&self) -> bool {
        self.lock_state().is_running()
    }

    /// Task IDs whose execution has not finished yet.
    pub fn in_flight(&self) -> Vec<TaskId> {
        self.shared.in_flight.ids()
    }

    /// Start the loop. Does nothing if it is already running.
    pub fn start(&self) {
        let mut state = self.lock_state();
        if state.is_running() {
            debug!("scheduler already running");
            return;
        }

        self.spawn_loop(&mut state);
        info!(generation = state.generation, "scheduler started");
    }

    /// Cancel the loop without waiting for running executions.
    ///
    /// Does nothing if the loop is not running.
    pub fn stop(&self) {
        let handle = self.lock_state().handle.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            info!(in_flight = self.shared.in_flight.len(), "scheduler stopped");
        }
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// Executions already dispatched keep running.
    pub async fn shutdown(&self) {
        let handle = self.lock_state().handle.take();
        let Some(handle) = handle else {
            return;
        };

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!(error = %e, "scheduler loop ended abnormally");
        }
        info!(in_flight = self.shared.in_flight.len(), "scheduler shut down");
    }

    /// Abandon the current pass or sleep and start over with a fresh snapshot.
    ///
    /// Call after tasks are added, edited, enabled or disabled. Running
    /// executions are not affected. Does nothing if the loop is not running.
    pub fn refresh(&self) {
        let mut state = self.lock_state();
        if !state.is_running() {
            debug!("scheduler not running, ignoring refresh");
            return;
        }

        if let Some(old) = state.handle.take() {
            old.cancel.cancel();
        }
        self.spawn_loop(&mut state);
        info!(generation = state.generation, "scheduler refreshed");
    }

    /// Execute a task now, outside its schedule.
    ///
    /// Returns `false` without doing anything if the task is already running.
    /// Works whether or not the loop is running.
    pub fn run_now(&self, task_id: &TaskId) -> bool {
        info!(task_id = %task_id, "manual run requested");
        self.shared.dispatch(task_id)
    }

    fn spawn_loop(&self, state: &mut LoopState) {
        state.generation += 1;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.shared),
            cancel.clone(),
            state.generation,
        ));
        state.handle = Some(LoopHandle { cancel, task });
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = state.handle.take() {
            handle.cancel.cancel();
        }
    }
}

/// The scheduling loop. Runs until `cancel` fires.
async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken, generation: u64) {
    debug!(generation, "scheduler loop entered");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // Not raced against cancellation: the snapshot may persist first-run
        // computations and must not be dropped halfway.
        let snapshots = shared.executor.load_task_snapshots().await;
        if cancel.is_cancelled() {
            break;
        }

        let pass = SchedulePass::evaluate(&snapshots, shared.clock.now());

        let dispatched = pass
            .due
            .iter()
            .filter(|id| shared.dispatch(id))
            .count();
        if dispatched > 0 {
            // Dispatching may move next run times; look again before sleeping.
            debug!(generation, dispatched, "dispatched due tasks");
            continue;
        }

        let wake = pass.wake(shared.clock.now(), &shared.config);
        if wake == Wake::Now {
            continue;
        }

        debug!(
            generation,
            sleep_ms = wake.duration().as_millis() as u64,
            scheduled = pass.scheduled,
            in_flight = shared.in_flight.len(),
            "scheduler sleeping"
        );

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = sleep(wake.duration()) => {}
        }
    }

    debug!(generation, "scheduler loop exited");
}
