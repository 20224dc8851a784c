/// Schedule evaluation: decides whether a configuration is due for a backup.
///
/// The evaluator is a pure function of the schedule, the last successful
/// execution and the current instant. The hourly driver calls it once per
/// enabled configuration per tick.
use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, Months, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

/// A set of hours of the day (0-23).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourSet(BTreeSet<u8>);

impl HourSet {
    /// Parse a comma-separated hour list, dropping anything that is not an
    /// hour in 0-23. Used when evaluating stored configurations.
    pub fn parse_lenient(raw: &str) -> Self {
        let hours = raw
            .split(',')
            .filter_map(|token| token.trim().parse::<u8>().ok())
            .filter(|h| *h <= 23)
            .collect();
        Self(hours)
    }

    /// Parse a comma-separated hour list for a configuration write.
    ///
    /// Rejects empty lists, non-numeric tokens, out-of-range values and
    /// duplicates.
    pub fn parse_strict(raw: &str) -> Result<Self> {
        let mut hours = BTreeSet::new();
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let hour: u8 = token.parse().map_err(|_| {
                BackupError::InvalidConfiguration(format!("'{token}' is not an hour (expected HH,HH,...)"))
            })?;
            if hour > 23 {
                return Err(BackupError::InvalidConfiguration(format!(
                    "hour {hour} is out of range 0-23"
                )));
            }
            if !hours.insert(hour) {
                return Err(BackupError::InvalidConfiguration(format!(
                    "hour {hour} is listed more than once"
                )));
            }
        }
        if hours.is_empty() {
            return Err(BackupError::InvalidConfiguration(
                "fixed-hours schedule needs at least one hour".into(),
            ));
        }
        Ok(Self(hours))
    }

    pub fn contains(&self, hour: u32) -> bool {
        u8::try_from(hour).is_ok_and(|h| self.0.contains(&h))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for HourSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|h| h.to_string()).collect();
        f.write_str(&joined.join(","))
    }
}

/// When a configuration produces backups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "hours")]
pub enum ScheduleMode {
    Daily,
    Weekly,
    Monthly,
    FixedHours(HourSet),
}

impl ScheduleMode {
    pub const DAILY: &'static str = "daily";
    pub const WEEKLY: &'static str = "weekly";
    pub const MONTHLY: &'static str = "monthly";
    pub const FIXED_HOURS: &'static str = "hours";

    /// Build a schedule for a configuration write (strict hour validation).
    pub fn parse(mode: &str, hours: Option<&str>) -> Result<Self> {
        match mode.trim() {
            Self::DAILY => Ok(Self::Daily),
            Self::WEEKLY => Ok(Self::Weekly),
            Self::MONTHLY => Ok(Self::Monthly),
            Self::FIXED_HOURS => Ok(Self::FixedHours(HourSet::parse_strict(hours.unwrap_or_default())?)),
            other => Err(BackupError::InvalidConfiguration(format!(
                "unknown schedule mode '{other}' (expected daily, weekly, monthly or hours)"
            ))),
        }
    }

    /// Rebuild a schedule from stored columns. Hours are parsed leniently so
    /// a bad stored value disables the schedule instead of failing the tick.
    pub fn from_stored(mode: &str, hours: Option<&str>) -> Result<Self> {
        match mode {
            Self::FIXED_HOURS => Ok(Self::FixedHours(HourSet::parse_lenient(hours.unwrap_or_default()))),
            other => Self::parse(other, None),
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Daily => Self::DAILY,
            Self::Weekly => Self::WEEKLY,
            Self::Monthly => Self::MONTHLY,
            Self::FixedHours(_) => Self::FIXED_HOURS,
        }
    }

    /// The hour list column value, present only for fixed-hours schedules.
    pub fn hours_column(&self) -> Option<String> {
        match self {
            Self::FixedHours(hours) => Some(hours.to_string()),
            _ => None,
        }
    }
}

/// Whole calendar months between two instants, the way a calendar-aware
/// difference counts them: Jan 31 10:00 to Feb 28 10:00 is one month.
fn whole_months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    if to <= from {
        return 0;
    }
    let span = (to.year() - from.year()) * 12 + (to.month() as i32 - from.month() as i32);
    let Ok(mut months) = u32::try_from(span) else {
        return 0;
    };
    while months > 0 {
        match from.checked_add_months(Months::new(months)) {
            Some(shifted) if shifted <= to => break,
            _ => months -= 1,
        }
    }
    months
}

/// Decide whether a backup should run at `now`.
pub fn should_run_now(
    schedule: &ScheduleMode,
    last_execution: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match schedule {
        ScheduleMode::FixedHours(hours) => {
            if hours.is_empty() || !hours.contains(now.hour()) {
                return false;
            }
            // The driver may tick more than once an hour.
            last_execution.map_or(true, |last| {
                !(last.date_naive() == now.date_naive() && last.hour() == now.hour())
            })
        }
        ScheduleMode::Daily => last_execution.map_or(true, |last| now - last >= Duration::days(1)),
        ScheduleMode::Weekly => last_execution.map_or(true, |last| now - last >= Duration::days(7)),
        ScheduleMode::Monthly => {
            last_execution.map_or(true, |last| whole_months_between(last, now) >= 1)
        }
    }
}
