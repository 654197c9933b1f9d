//! End-to-end behavior of the scheduling loop against a scripted executor.
//!
//! All tests run on Tokio's paused clock, so sleeps resolve instantly and the
//! wall clock handed to the scheduler advances in step with them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{Instant, sleep};

use cadence_scheduler::{Clock, Executing, SchedulerConfig, TaskId, TaskScheduler, TaskSnapshot};

/// Wall clock that follows Tokio's (pausable) monotonic clock.
struct PausedClock {
    base: DateTime<Utc>,
    started: Instant,
}

impl PausedClock {
    fn new() -> Self {
        Self {
            base: Utc::now(),
            started: Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}

/// What the fake executor does to a task after running it.
#[derive(Clone, Copy)]
enum AfterRun {
    /// Move next run forward from the trigger time.
    Reschedule(chrono::Duration),
    /// One-shot: disable and clear next run.
    Exhaust,
    /// Leave the task untouched, as a failed run does.
    Keep,
}

struct FakeTask {
    snapshot: TaskSnapshot,
    after_run: AfterRun,
}

struct FakeExecutor {
    clock: Arc<PausedClock>,
    tasks: Mutex<Vec<FakeTask>>,
    delay: Duration,
    snapshot_times: Mutex<Vec<Instant>>,
    executions: Mutex<Vec<TaskId>>,
    running: Mutex<HashMap<TaskId, usize>>,
    max_concurrent: AtomicUsize,
}

impl FakeExecutor {
    fn new(clock: Arc<PausedClock>, delay: Duration) -> Self {
        Self {
            clock,
            tasks: Mutex::new(Vec::new()),
            delay,
            snapshot_times: Mutex::new(Vec::new()),
            executions: Mutex::new(Vec::new()),
            running: Mutex::new(HashMap::new()),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    fn add(&self, id: &str, offset: Option<chrono::Duration>, is_enabled: bool, after_run: AfterRun) {
        let now = self.clock.now();
        self.tasks.lock().unwrap().push(FakeTask {
            snapshot: TaskSnapshot {
                id: TaskId::from(id),
                next_run_at: offset.map(|o| now + o),
                is_enabled,
            },
            after_run,
        });
    }

    fn task(&self, id: &str) -> TaskSnapshot {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.snapshot.id.as_str() == id)
            .map(|t| t.snapshot.clone())
            .unwrap()
    }

    fn executions(&self) -> Vec<TaskId> {
        self.executions.lock().unwrap().clone()
    }

    fn snapshot_count(&self) -> usize {
        self.snapshot_times.lock().unwrap().len()
    }
}

#[async_trait]
impl Executing for FakeExecutor {
    async fn load_task_snapshots(&self) -> Vec<TaskSnapshot> {
        self.snapshot_times.lock().unwrap().push(Instant::now());
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.snapshot.clone())
            .collect()
    }

    async fn execute(&self, task_id: &TaskId) {
        let triggered_at = self.clock.now();
        self.executions.lock().unwrap().push(task_id.clone());
        {
            let mut running = self.running.lock().unwrap();
            let count = running.entry(task_id.clone()).or_default();
            *count += 1;
            self.max_concurrent.fetch_max(*count, Ordering::SeqCst);
        }

        sleep(self.delay).await;

        *self.running.lock().unwrap().get_mut(task_id).unwrap() -= 1;

        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| &t.snapshot.id == task_id) {
            match task.after_run {
                AfterRun::Reschedule(every) => task.snapshot.next_run_at = Some(triggered_at + every),
                AfterRun::Exhaust => {
                    task.snapshot.next_run_at = None;
                    task.snapshot.is_enabled = false;
                }
                AfterRun::Keep => {}
            }
        }
    }
}

fn setup(delay: Duration) -> (Arc<FakeExecutor>, TaskScheduler) {
    setup_with(SchedulerConfig::default(), delay)
}

fn setup_with(config: SchedulerConfig, delay: Duration) -> (Arc<FakeExecutor>, TaskScheduler) {
    let clock = Arc::new(PausedClock::new());
    let executor = Arc::new(FakeExecutor::new(Arc::clone(&clock), delay));
    let scheduler = TaskScheduler::with_clock(executor.clone(), config, clock);
    (executor, scheduler)
}

fn secs(s: i64) -> Option<chrono::Duration> {
    Some(chrono::Duration::seconds(s))
}

#[tokio::test(start_paused = true)]
async fn test_overdue_task_dispatched_future_task_not() {
    let (executor, scheduler) = setup(Duration::ZERO);
    executor.add("overdue", secs(-1), true, AfterRun::Reschedule(chrono::Duration::hours(1)));
    executor.add("later", secs(3600), true, AfterRun::Reschedule(chrono::Duration::hours(1)));

    scheduler.start();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(executor.executions(), vec![TaskId::from("overdue")]);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_task_never_dispatched() {
    let (executor, scheduler) = setup(Duration::ZERO);
    executor.add("disabled", secs(-3600), false, AfterRun::Keep);

    scheduler.start();
    sleep(Duration::from_secs(600)).await;

    assert!(executor.executions().is_empty());
    assert!(executor.snapshot_count() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_runs_once() {
    let (executor, scheduler) = setup(Duration::ZERO);
    executor.add("once", secs(-5), true, AfterRun::Exhaust);

    scheduler.start();
    sleep(Duration::from_secs(900)).await;

    assert_eq!(executor.executions(), vec![TaskId::from("once")]);
    let task = executor.task("once");
    assert!(!task.is_enabled);
    assert_eq!(task.next_run_at, None);
}

#[tokio::test(start_paused = true)]
async fn test_slow_execution_is_never_duplicated() {
    let (executor, scheduler) = setup(Duration::from_secs(600));
    executor.add("slow", secs(-1), true, AfterRun::Keep);

    scheduler.start();
    sleep(Duration::from_secs(300)).await;

    // Still due and still running: neither the loop nor a manual trigger
    // may start a second execution.
    assert_eq!(executor.executions().len(), 1);
    assert!(!scheduler.run_now(&TaskId::from("slow")));
    assert_eq!(scheduler.in_flight(), vec![TaskId::from("slow")]);

    // Once it finishes the task is still due and gets retried.
    sleep(Duration::from_secs(340)).await;
    assert_eq!(executor.executions().len(), 2);
    assert_eq!(executor.max_concurrent.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_finished_execution_seen_within_chunk_not_idle_interval() {
    let config = SchedulerConfig::default()
        .with_idle_poll_interval(Duration::from_secs(600))
        .with_max_sleep_chunk(Duration::from_secs(10));
    let (executor, scheduler) = setup_with(config, Duration::from_secs(45));
    executor.add("busy", secs(-1), true, AfterRun::Keep);

    scheduler.start();
    // Finishes at +45; the next chunk boundary at +50 sees it still due.
    sleep(Duration::from_secs(56)).await;

    assert_eq!(executor.executions().len(), 2);
    assert_eq!(executor.max_concurrent.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_now_dispatches_outside_schedule() {
    let (executor, scheduler) = setup(Duration::ZERO);
    executor.add("later", secs(3600), true, AfterRun::Reschedule(chrono::Duration::hours(1)));

    scheduler.start();
    sleep(Duration::from_millis(10)).await;
    assert!(executor.executions().is_empty());

    assert!(scheduler.run_now(&TaskId::from("later")));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(executor.executions(), vec![TaskId::from("later")]);
}

#[tokio::test(start_paused = true)]
async fn test_idle_loop_polls_at_idle_interval() {
    let (executor, scheduler) = setup(Duration::ZERO);

    scheduler.start();
    sleep(Duration::from_secs(301)).await;

    // One poll at start, then one per 30s idle interval.
    let count = executor.snapshot_count();
    assert!((10..=12).contains(&count), "unexpected poll count {count}");
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_long_wait() {
    let (executor, scheduler) = setup(Duration::ZERO);
    executor.add("far", secs(86_400), true, AfterRun::Keep);

    scheduler.start();
    sleep(Duration::from_secs(1)).await;

    let started = Instant::now();
    tokio::time::timeout(scheduler.config().max_sleep_chunk, scheduler.shutdown())
        .await
        .expect("loop should exit within one sleep chunk");
    assert!(started.elapsed() <= scheduler.config().max_sleep_chunk);

    let polls = executor.snapshot_count();
    sleep(Duration::from_secs(3600)).await;
    assert_eq!(executor.snapshot_count(), polls);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_picks_up_new_task_immediately() {
    let (executor, scheduler) = setup(Duration::ZERO);

    scheduler.start();
    sleep(Duration::from_secs(1)).await;

    executor.add("new", secs(-1), true, AfterRun::Reschedule(chrono::Duration::hours(1)));
    let refreshed_at = Instant::now();
    scheduler.refresh();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(executor.executions(), vec![TaskId::from("new")]);
    assert!(refreshed_at.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_mixed_scenario_dispatches_only_due_task() {
    let (executor, scheduler) = setup(Duration::ZERO);
    executor.add("a", secs(-10), true, AfterRun::Reschedule(chrono::Duration::hours(1)));
    executor.add("b", secs(300), true, AfterRun::Reschedule(chrono::Duration::hours(1)));
    executor.add("c", None, false, AfterRun::Keep);

    let b_before = executor.task("b");
    let c_before = executor.task("c");

    scheduler.start();
    sleep(Duration::from_secs(120)).await;

    assert_eq!(executor.executions(), vec![TaskId::from("a")]);
    assert_eq!(executor.task("b"), b_before);
    assert_eq!(executor.task("c"), c_before);

    // No gap between polls exceeds min(5m, max_sleep_chunk).
    let bound = Duration::from_secs(300).min(scheduler.config().max_sleep_chunk);
    let times = executor.snapshot_times.lock().unwrap().clone();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] <= bound);
    }
}

#[tokio::test(start_paused = true)]
async fn test_due_tasks_dispatched_in_snapshot_order() {
    let (executor, scheduler) = setup(Duration::ZERO);
    for id in ["third", "first", "second"] {
        executor.add(id, secs(-1), true, AfterRun::Reschedule(chrono::Duration::hours(1)));
    }

    scheduler.start();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        executor.executions(),
        vec![TaskId::from("third"), TaskId::from("first"), TaskId::from("second")]
    );
}
