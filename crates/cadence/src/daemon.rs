//! `cadence daemon`: run the scheduler until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tracing::{info, warn};

use cadence_scheduler::{SchedulerConfig, TaskScheduler};
use cadence_tasks::{JsonFileStore, ScheduledTaskExecutor};

use crate::runner::CommandRunner;

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub store_path: PathBuf,
    /// Shell command each execution runs.
    pub command: String,
    /// Seconds between polls when nothing is scheduled.
    pub idle_poll_secs: u64,
    /// Longest single sleep, in seconds.
    pub max_sleep_secs: u64,
    /// Kill a run after this many seconds (0 to disable).
    pub run_timeout_secs: u64,
    /// Hold a failed task back this many seconds before retrying (0 to disable).
    pub retry_delay_secs: u64,
}

pub async fn run(config: DaemonConfig) -> Result<()> {
    if config.idle_poll_secs == 0 || config.max_sleep_secs == 0 {
        return Err(miette::miette!(
            "idle poll interval and max sleep must be at least one second"
        ));
    }

    let store = Arc::new(JsonFileStore::new(&config.store_path));

    let mut runner = CommandRunner::new(&config.command);
    if config.run_timeout_secs > 0 {
        runner = runner.with_timeout(Duration::from_secs(config.run_timeout_secs));
    }

    let mut executor = ScheduledTaskExecutor::new(store, Arc::new(runner));
    if config.retry_delay_secs > 0 {
        let delay = i64::try_from(config.retry_delay_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| miette::miette!("retry delay is too large"))?;
        executor = executor.with_failure_retry_delay(delay);
    }

    let scheduler_config = SchedulerConfig::new()
        .with_idle_poll_interval(Duration::from_secs(config.idle_poll_secs))
        .with_max_sleep_chunk(Duration::from_secs(config.max_sleep_secs));
    let scheduler = TaskScheduler::new(Arc::new(executor), scheduler_config);

    info!(
        store = %config.store_path.display(),
        command = %config.command,
        "starting cadence daemon"
    );
    scheduler.start();

    wait_for_shutdown(&scheduler).await?;

    info!("shutting down");
    scheduler.shutdown().await;
    Ok(())
}

/// Block until Ctrl-C. On Unix, SIGHUP makes the scheduler re-read the store.
#[cfg(unix)]
async fn wait_for_shutdown(scheduler: &TaskScheduler) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())
        .map_err(|e| miette::miette!("failed to install SIGHUP handler: {}", e))?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("received SIGHUP, refreshing schedule");
                scheduler.refresh();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_scheduler: &TaskScheduler) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("failed to listen for ctrl-c: {}", e))
}
