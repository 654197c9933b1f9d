//! Task management subcommands. These share the daemon's store and
//! executor but never start the scheduling loop.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Args;
use miette::Result;

use cadence_scheduler::Executing;
use cadence_tasks::{
    JsonFileStore, NewTask, ScheduledTask, ScheduledTaskExecutor, ScheduledTaskRun, TaskId,
    TaskRunner, TaskSchedule, TaskUpdate,
};

use crate::runner::CommandRunner;

/// Exactly one way of scheduling a task.
#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct ScheduleArgs {
    /// Run once at this RFC 3339 time (e.g. 2026-01-01T09:00:00Z)
    #[arg(long, value_parser = parse_rfc3339)]
    pub at: Option<DateTime<Utc>>,

    /// Run every N seconds
    #[arg(long, value_name = "SECONDS")]
    pub every: Option<u64>,

    /// Run on a cron expression (5 or 6 fields, UTC)
    #[arg(long, value_name = "EXPR")]
    pub cron: Option<String>,
}

impl ScheduleArgs {
    fn into_schedule(self) -> Option<TaskSchedule> {
        if let Some(at) = self.at {
            Some(TaskSchedule::Once { at })
        } else if let Some(seconds) = self.every {
            Some(TaskSchedule::Interval { seconds })
        } else {
            self.cron.map(|expression| TaskSchedule::Cron { expression })
        }
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time '{}': {}", s, e))
}

/// Stands in for the real runner when no command is needed.
struct NoCommand;

#[async_trait]
impl TaskRunner for NoCommand {
    async fn submit(&self, _task: &ScheduledTask) -> Result<String, String> {
        Err("no command configured (set --command or CADENCE_COMMAND)".to_string())
    }
}

fn executor(store_path: &Path, runner: Arc<dyn TaskRunner>) -> ScheduledTaskExecutor {
    ScheduledTaskExecutor::new(Arc::new(JsonFileStore::new(store_path)), runner)
}

fn management_executor(store_path: &Path) -> ScheduledTaskExecutor {
    executor(store_path, Arc::new(NoCommand))
}

pub async fn add(
    store_path: &Path,
    name: String,
    prompt: String,
    schedule: ScheduleArgs,
    disabled: bool,
) -> Result<()> {
    let schedule = schedule
        .into_schedule()
        .ok_or_else(|| miette::miette!("one of --at, --every or --cron is required"))?;

    let task = management_executor(store_path)
        .create_task(NewTask {
            name,
            prompt,
            schedule,
            is_enabled: !disabled,
        })
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("{}", task.id);
    Ok(())
}

pub async fn edit(
    store_path: &Path,
    id: TaskId,
    name: Option<String>,
    prompt: Option<String>,
    schedule: ScheduleArgs,
) -> Result<()> {
    let update = TaskUpdate {
        name,
        prompt,
        schedule: schedule.into_schedule(),
    };

    let task = management_executor(store_path)
        .update_task(&id, update)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("{}", task_line(&task));
    Ok(())
}

pub async fn list(store_path: &Path, json: bool) -> Result<()> {
    let tasks = management_executor(store_path)
        .list_tasks()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    if json {
        let out = serde_json::to_string_pretty(&tasks)
            .map_err(|e| miette::miette!("failed to serialize tasks: {}", e))?;
        println!("{out}");
    } else if tasks.is_empty() {
        println!("no tasks");
    } else {
        for task in &tasks {
            println!("{}", task_line(task));
        }
    }
    Ok(())
}

pub async fn show(store_path: &Path, id: TaskId) -> Result<()> {
    let task = management_executor(store_path)
        .get_task(&id)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let out = serde_json::to_string_pretty(&task)
        .map_err(|e| miette::miette!("failed to serialize task: {}", e))?;
    println!("{out}");
    Ok(())
}

pub async fn set_enabled(store_path: &Path, id: TaskId, enabled: bool) -> Result<()> {
    let task = management_executor(store_path)
        .set_enabled(&id, enabled)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("{}", task_line(&task));
    Ok(())
}

pub async fn remove(store_path: &Path, id: TaskId) -> Result<()> {
    management_executor(store_path)
        .delete_task(&id)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("removed {id}");
    Ok(())
}

/// Execute a task once, right now, and print the recorded run.
///
/// Deduplication only covers executions inside one scheduler, so this may
/// overlap a run the daemon is performing for the same task.
pub async fn run(store_path: &Path, id: TaskId, runner: CommandRunner) -> Result<()> {
    let executor = executor(store_path, Arc::new(runner));

    // `execute` skips unknown and disabled tasks silently; surface that here.
    let task = executor
        .get_task(&id)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    if !task.is_enabled {
        return Err(miette::miette!("task {} is disabled", id));
    }

    executor.execute(&id).await;

    let run = executor
        .list_runs(&id, 1)
        .await
        .map_err(|e| miette::miette!("{}", e))?
        .into_iter()
        .next()
        .ok_or_else(|| miette::miette!("no run was recorded for task {}", id))?;

    println!("{}", run_line(&run));
    match run.error_message {
        Some(message) => Err(miette::miette!("run failed: {}", message)),
        None => Ok(()),
    }
}

pub async fn runs(store_path: &Path, id: TaskId, limit: usize, json: bool) -> Result<()> {
    let runs = management_executor(store_path)
        .list_runs(&id, limit)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    if json {
        let out = serde_json::to_string_pretty(&runs)
            .map_err(|e| miette::miette!("failed to serialize runs: {}", e))?;
        println!("{out}");
    } else if runs.is_empty() {
        println!("no runs");
    } else {
        for run in &runs {
            println!("{}", run_line(run));
        }
    }
    Ok(())
}

fn describe_schedule(schedule: &TaskSchedule) -> String {
    match schedule {
        TaskSchedule::Once { at } => format!("once at {}", at.to_rfc3339()),
        TaskSchedule::Interval { seconds } => format!("every {seconds}s"),
        TaskSchedule::Cron { expression } => format!("cron '{expression}'"),
    }
}

fn task_line(task: &ScheduledTask) -> String {
    let state = if task.is_enabled { "enabled" } else { "disabled" };
    let next = task
        .next_run_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{}  {}  [{}]  {}  next: {}",
        task.id,
        task.name,
        state,
        describe_schedule(&task.schedule),
        next
    );
    if let Some(error) = &task.last_error {
        line.push_str(&format!("  error: {error}"));
    }
    line
}

fn run_line(run: &ScheduledTaskRun) -> String {
    let outcome = match (&run.session_id, &run.error_message) {
        (_, Some(error)) => format!("failed: {error}"),
        (Some(session), None) => format!("session {session}"),
        (None, None) => "submitted".to_string(),
    };
    format!(
        "{}  {}ms  {}",
        run.triggered_at.to_rfc3339(),
        run.duration_ms,
        outcome
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_args_pick_the_given_flag() {
        let every = ScheduleArgs {
            every: Some(90),
            ..Default::default()
        };
        assert_eq!(
            every.into_schedule(),
            Some(TaskSchedule::Interval { seconds: 90 })
        );

        let cron = ScheduleArgs {
            cron: Some("*/5 * * * *".to_string()),
            ..Default::default()
        };
        assert_eq!(
            cron.into_schedule(),
            Some(TaskSchedule::Cron {
                expression: "*/5 * * * *".to_string()
            })
        );

        assert_eq!(ScheduleArgs::default().into_schedule(), None);
    }

    #[test]
    fn test_rfc3339_is_normalized_to_utc() {
        let at = parse_rfc3339("2026-03-01T10:00:00+02:00").unwrap();
        assert_eq!(at.to_rfc3339(), "2026-03-01T08:00:00+00:00");
        assert!(parse_rfc3339("tomorrow").is_err());
    }

    #[tokio::test]
    async fn test_add_list_and_remove_against_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        add(
            &path,
            "nightly".to_string(),
            "summarize".to_string(),
            ScheduleArgs {
                cron: Some("0 3 * * *".to_string()),
                ..Default::default()
            },
            false,
        )
        .await
        .unwrap();

        let tasks = management_executor(&path).list_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "nightly");
        assert!(tasks[0].is_enabled);

        set_enabled(&path, tasks[0].id.clone(), false).await.unwrap();
        let task = management_executor(&path).get_task(&tasks[0].id).await.unwrap();
        assert!(!task.is_enabled);

        remove(&path, tasks[0].id.clone()).await.unwrap();
        assert!(management_executor(&path).list_tasks().await.unwrap().is_empty());
        assert!(remove(&path, tasks[0].id.clone()).await.is_err());
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_schedules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let missing = add(&path, "x".into(), "y".into(), ScheduleArgs::default(), false).await;
        assert!(missing.is_err());

        let zero = ScheduleArgs {
            every: Some(0),
            ..Default::default()
        };
        assert!(add(&path, "x".into(), "y".into(), zero, false).await.is_err());

        let bad_cron = ScheduleArgs {
            cron: Some("not a cron".to_string()),
            ..Default::default()
        };
        assert!(add(&path, "x".into(), "y".into(), bad_cron, false).await.is_err());
    }

    #[tokio::test]
    async fn test_run_records_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let task = management_executor(&path)
            .create_task(NewTask {
                name: "adhoc".to_string(),
                prompt: "ping".to_string(),
                schedule: TaskSchedule::Interval { seconds: 3600 },
                is_enabled: true,
            })
            .await
            .unwrap();

        run(&path, task.id.clone(), CommandRunner::new("echo s-1"))
            .await
            .unwrap();

        let runs = management_executor(&path).list_runs(&task.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].session_id.as_deref(), Some("s-1"));
    }

    #[tokio::test]
    async fn test_run_refuses_disabled_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let task = management_executor(&path)
            .create_task(NewTask {
                name: "off".to_string(),
                prompt: String::new(),
                schedule: TaskSchedule::Interval { seconds: 60 },
                is_enabled: false,
            })
            .await
            .unwrap();

        let result = run(&path, task.id.clone(), CommandRunner::new("true")).await;
        assert!(result.is_err());
        assert!(management_executor(&path).list_runs(&task.id, 10).await.unwrap().is_empty());
    }
}
