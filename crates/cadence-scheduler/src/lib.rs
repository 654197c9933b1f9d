//! Scheduling core for Cadence.
//!
//! This crate provides the background loop that:
//! - Reads task snapshots from an [`Executing`] collaborator
//! - Dispatches every due task without waiting for it to finish
//! - Never runs two executions of the same task at once
//! - Sleeps until the next due time in bounded chunks
//!
//! Schedule math, persistence and the work a task performs all live behind
//! the [`Executing`] trait.

mod clock;
mod config;
mod executing;
mod in_flight;
mod plan;
mod scheduler;
mod types;

pub use clock::{Clock, SystemClock};
pub use config::SchedulerConfig;
pub use executing::Executing;
pub use in_flight::{InFlight, InFlightGuard};
pub use plan::{SchedulePass, Wake, next_wake};
pub use scheduler::TaskScheduler;
pub use types::{TaskId, TaskSnapshot};
