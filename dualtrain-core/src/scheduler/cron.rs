//! Recurrence parsing and due-run selection.
//!
//! Presets (`@once`, `@daily`, ...) are mapped onto 7-field cron expressions
//! understood by the `cron` crate.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SchedulerError;

/// Upper bound on back-filled runs returned by a single evaluation.
pub const MAX_BACKFILL_RUNS: usize = 1000;

/// How often a pipeline fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Recurrence {
    /// A single run at the anchor start date.
    Once,
    /// A cron expression, stored as written.
    Cron(String),
}

impl Recurrence {
    fn preset_expression(preset: &str) -> Option<&'static str> {
        match preset {
            "@hourly" => Some("0 0 * * * * *"),
            "@daily" | "@midnight" => Some("0 0 0 * * * *"),
            "@weekly" => Some("0 0 0 * * SUN *"),
            "@monthly" => Some("0 0 0 1 * * *"),
            "@yearly" | "@annually" => Some("0 0 0 1 1 * *"),
            _ => None,
        }
    }

    /// The parsed cron schedule, or `None` for [`Recurrence::Once`].
    pub fn schedule(&self) -> Option<Result<Schedule, SchedulerError>> {
        match self {
            Recurrence::Once => None,
            Recurrence::Cron(expr) => {
                let resolved = Self::preset_expression(expr).unwrap_or(expr);
                Some(parse_cron_expression(resolved))
            }
        }
    }
}

impl FromStr for Recurrence {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "@once" {
            return Ok(Recurrence::Once);
        }
        let expr = Self::preset_expression(trimmed).unwrap_or(trimmed);
        parse_cron_expression(expr)?;
        Ok(Recurrence::Cron(trimmed.to_string()))
    }
}

impl TryFrom<String> for Recurrence {
    type Error = SchedulerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Recurrence> for String {
    fn from(value: Recurrence) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Once => write!(f, "@once"),
            Recurrence::Cron(expr) => write!(f, "{}", expr),
        }
    }
}

/// Parse a cron expression string into a Schedule.
fn parse_cron_expression(expr: &str) -> Result<Schedule, SchedulerError> {
    Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidSchedule {
        expression: expr.to_string(),
        message: e.to_string(),
    })
}

/// Scheduling metadata registered alongside a pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub recurrence: Recurrence,
    /// Anchor: no run is ever scheduled before this instant.
    pub start_date: DateTime<Utc>,
    /// When false, only the most recent missed interval is run.
    pub catchup: bool,
}

impl ScheduleSpec {
    /// Next fire time strictly after `after`, never earlier than the anchor.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        match self.recurrence.schedule() {
            None => Ok((after < self.start_date).then_some(self.start_date)),
            Some(schedule) => {
                let schedule = schedule?;
                let from = after.max(self.start_date - Duration::seconds(1));
                Ok(schedule.after(&from).next())
            }
        }
    }

    /// Logical dates that should be run now, given the last run's logical date.
    ///
    /// With catch-up disabled at most one date is returned: the latest one.
    pub fn due_runs(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
        let schedule = match self.recurrence.schedule() {
            None => {
                let due = last_run.is_none() && now >= self.start_date;
                return Ok(if due { vec![self.start_date] } else { Vec::new() });
            }
            Some(schedule) => schedule?,
        };

        let from = match last_run {
            Some(last) => last.max(self.start_date - Duration::seconds(1)),
            None => self.start_date - Duration::seconds(1),
        };

        if !self.catchup {
            // Walk back from the first whole second after `now`.
            let ceiling = now.trunc_subsecs(0) + Duration::seconds(1);
            let latest = schedule.after(&ceiling).next_back();
            return Ok(latest.filter(|t| *t > from && *t <= now).into_iter().collect());
        }

        Ok(schedule
            .after(&from)
            .take_while(|t| *t <= now)
            .take(MAX_BACKFILL_RUNS)
            .collect())
    }
}
