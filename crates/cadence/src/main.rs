//! Cadence: run user-defined tasks on one-shot, interval and cron schedules.
//!
//! Main binary with subcommands:
//! - `daemon`: Run the scheduler against the task store
//! - `add`, `edit`, `list`, `show`, `enable`, `disable`, `remove`: Manage tasks
//! - `run`: Execute a task immediately
//! - `runs`: Show a task's run history

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence_tasks::TaskId;

mod daemon;
mod manage;
mod runner;

use manage::ScheduleArgs;
use runner::CommandRunner;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Scheduled task runner", long_about = None)]
struct Cli {
    /// Task store file (defaults to <data dir>/cadence/tasks.json)
    #[arg(long, env = "CADENCE_STORE", global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted (SIGHUP reloads the store)
    Daemon {
        /// Shell command run for each execution; the prompt arrives on stdin
        #[arg(long, env = "CADENCE_COMMAND")]
        command: String,

        /// Poll interval in seconds when no task is scheduled
        #[arg(long, env = "CADENCE_IDLE_POLL_SECS", default_value = "30")]
        idle_poll_secs: u64,

        /// Longest single sleep in seconds
        #[arg(long, env = "CADENCE_MAX_SLEEP_SECS", default_value = "30")]
        max_sleep_secs: u64,

        /// Kill a run after this many seconds (0 to disable)
        #[arg(long, env = "CADENCE_RUN_TIMEOUT_SECS", default_value = "0")]
        run_timeout_secs: u64,

        /// Wait this many seconds before retrying a failed task (0 retries on the next pass)
        #[arg(long, env = "CADENCE_RETRY_DELAY_SECS", default_value = "60")]
        retry_delay_secs: u64,
    },

    /// Create a task and print its ID
    Add {
        /// Task name
        name: String,

        /// Text handed to the command on stdin
        #[arg(long, default_value = "")]
        prompt: String,

        #[command(flatten)]
        schedule: ScheduleArgs,

        /// Create the task disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Change a task's name, prompt or schedule
    Edit {
        id: TaskId,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        prompt: Option<String>,

        #[command(flatten)]
        schedule: ScheduleArgs,
    },

    /// List all tasks
    List {
        /// Print JSON instead of one line per task
        #[arg(long)]
        json: bool,
    },

    /// Print one task as JSON
    Show { id: TaskId },

    /// Enable a task
    Enable { id: TaskId },

    /// Disable a task
    Disable { id: TaskId },

    /// Delete a task and its run history
    Remove { id: TaskId },

    /// Execute a task once, now
    ///
    /// This runs in its own process and does not coordinate with a running
    /// daemon, so it can overlap an execution the daemon already started.
    Run {
        id: TaskId,

        /// Shell command to run; the prompt arrives on stdin
        #[arg(long, env = "CADENCE_COMMAND")]
        command: String,

        /// Kill the run after this many seconds (0 to disable)
        #[arg(long, env = "CADENCE_RUN_TIMEOUT_SECS", default_value = "0")]
        run_timeout_secs: u64,
    },

    /// Show a task's most recent runs, newest first
    Runs {
        id: TaskId,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Print JSON instead of one line per run
        #[arg(long)]
        json: bool,
    },
}

fn default_store_path() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("cadence").join("tasks.json"))
        .ok_or_else(|| miette::miette!("no data directory found; pass --store or set CADENCE_STORE"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "cadence=info,cadence_scheduler=info,cadence_tasks=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let store = match cli.store {
        Some(path) => path,
        None => default_store_path()?,
    };

    match cli.command {
        Commands::Daemon {
            command,
            idle_poll_secs,
            max_sleep_secs,
            run_timeout_secs,
            retry_delay_secs,
        } => {
            daemon::run(daemon::DaemonConfig {
                store_path: store,
                command,
                idle_poll_secs,
                max_sleep_secs,
                run_timeout_secs,
                retry_delay_secs,
            })
            .await
        }

        Commands::Add {
            name,
            prompt,
            schedule,
            disabled,
        } => manage::add(&store, name, prompt, schedule, disabled).await,

        Commands::Edit {
            id,
            name,
            prompt,
            schedule,
        } => manage::edit(&store, id, name, prompt, schedule).await,

        Commands::List { json } => manage::list(&store, json).await,

        Commands::Show { id } => manage::show(&store, id).await,

        Commands::Enable { id } => manage::set_enabled(&store, id, true).await,

        Commands::Disable { id } => manage::set_enabled(&store, id, false).await,

        Commands::Remove { id } => manage::remove(&store, id).await,

        Commands::Run {
            id,
            command,
            run_timeout_secs,
        } => {
            let mut runner = CommandRunner::new(command);
            if run_timeout_secs > 0 {
                runner = runner.with_timeout(Duration::from_secs(run_timeout_secs));
            }
            manage::run(&store, id, runner).await
        }

        Commands::Runs { id, limit, json } => manage::runs(&store, id, limit, json).await,
    }
}
