//! Next-occurrence computation for task schedules.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::{ScheduleError, TaskSchedule};

/// Computes when a schedule next fires.
pub trait NextRunCalculator: Send + Sync {
    /// First occurrence of `schedule` strictly after `anchor`.
    ///
    /// Returns [`ScheduleError::Exhausted`] when there is none, for example a
    /// one-shot schedule whose time has passed.
    fn next_run(
        &self,
        schedule: &TaskSchedule,
        anchor: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError>;

    /// Check that `schedule` is well-formed and still has an occurrence
    /// after `now`.
    fn validate(&self, schedule: &TaskSchedule, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.next_run(schedule, now).map(|_| ())
    }
}

/// Standard calculator for once, interval and cron schedules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleCalculator;

impl ScheduleCalculator {
    /// Parse a cron expression, accepting the classic 5-field form by
    /// prepending a zero seconds field.
    fn parse_cron(expression: &str) -> Result<cron::Schedule, ScheduleError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };

        cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
    }
}

impl NextRunCalculator for ScheduleCalculator {
    fn next_run(
        &self,
        schedule: &TaskSchedule,
        anchor: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        match schedule {
            TaskSchedule::Once { at } => {
                if *at > anchor {
                    Ok(*at)
                } else {
                    Err(ScheduleError::Exhausted)
                }
            }
            TaskSchedule::Interval { seconds } => {
                if *seconds == 0 {
                    return Err(ScheduleError::InvalidInterval);
                }
                let step = i64::try_from(*seconds)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .ok_or(ScheduleError::OutOfRange)?;
                anchor
                    .checked_add_signed(step)
                    .ok_or(ScheduleError::OutOfRange)
            }
            TaskSchedule::Cron { expression } => Self::parse_cron(expression)?
                .after(&anchor)
                .next()
                .ok_or(ScheduleError::Exhausted),
        }
    }
}
