//! Due-set computation and sleep arithmetic for one scheduling pass.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{SchedulerConfig, TaskId, TaskSnapshot};

/// Result of partitioning a snapshot list at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePass {
    /// Tasks due now, in snapshot order.
    pub due: Vec<TaskId>,
    /// Earliest next run time among enabled tasks that are not yet due.
    pub next_due_at: Option<DateTime<Utc>>,
    /// Number of enabled tasks with a next run time.
    pub scheduled: usize,
}

impl SchedulePass {
    /// Partition `snapshots` into due and upcoming tasks at `now`.
    ///
    /// Disabled tasks and tasks without a next run time are ignored.
    pub fn evaluate(snapshots: &[TaskSnapshot], now: DateTime<Utc>) -> Self {
        let mut pass = Self::default();

        for snapshot in snapshots.iter().filter(|s| s.is_enabled) {
            let Some(next_run_at) = snapshot.next_run_at else {
                continue;
            };

            pass.scheduled += 1;
            if next_run_at <= now {
                pass.due.push(snapshot.id.clone());
            } else {
                pass.next_due_at = Some(match pass.next_due_at {
                    Some(current) => current.min(next_run_at),
                    None => next_run_at,
                });
            }
        }

        pass
    }

    /// How long to sleep after this pass dispatched nothing.
    ///
    /// Scheduled tasks that are all due but still in flight count as
    /// scheduled, so the loop comes back within one sleep chunk rather than
    /// the idle interval.
    pub fn wake(&self, now: DateTime<Utc>, config: &SchedulerConfig) -> Wake {
        if self.next_due_at.is_none() && self.scheduled > 0 {
            return Wake::After(config.max_sleep_chunk);
        }
        next_wake(self.next_due_at, now, config)
    }
}

/// What the loop should do after a pass that dispatched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Something is already due; run another pass right away.
    Now,
    /// Sleep this long, then run another pass.
    After(Duration),
    /// Nothing is scheduled; sleep for the idle poll interval.
    Idle(Duration),
}

impl Wake {
    /// How long the loop will sleep before its next pass.
    pub fn duration(self) -> Duration {
        match self {
            Self::Now => Duration::ZERO,
            Self::After(d) | Self::Idle(d) => d,
        }
    }
}

/// Decide how long to sleep given the earliest upcoming due time.
pub fn next_wake(
    next_due_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Wake {
    let Some(next_due_at) = next_due_at else {
        return Wake::Idle(config.idle_poll_interval);
    };

    let delta = next_due_at - now;
    if delta <= chrono::Duration::zero() {
        return Wake::Now;
    }

    let delta = delta.to_std().unwrap_or(config.max_sleep_chunk);
    Wake::After(delta.min(config.max_sleep_chunk))
}
