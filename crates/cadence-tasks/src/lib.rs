//! Task records, schedule math, storage and execution for Cadence.
//!
//! This crate provides the collaborators the scheduling core drives:
//! - [`ScheduledTask`] and [`ScheduledTaskRun`] records
//! - [`ScheduleCalculator`] for one-shot, interval and cron schedules
//! - [`TaskStore`] with in-memory and JSON file backends
//! - [`ScheduledTaskExecutor`], which implements
//!   [`cadence_scheduler::Executing`] on top of a store and a [`TaskRunner`]

mod error;
mod executor;
mod next_run;
mod runner;
mod store;
mod types;

pub use error::{ScheduleError, TaskError};
pub use executor::{NewTask, ScheduledTaskExecutor, TaskUpdate};
pub use next_run::{NextRunCalculator, ScheduleCalculator};
pub use runner::TaskRunner;
pub use store::{DEFAULT_RUN_RETENTION, JsonFileStore, MemoryTaskStore, TaskStore};
pub use types::{RunStatus, ScheduledTask, ScheduledTaskRun, TaskSchedule};

pub use cadence_scheduler::TaskId;
