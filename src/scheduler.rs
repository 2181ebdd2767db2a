//! Scheduler (C10): parses `spec.when` entries and gates `Progress()`
//! invocation on a reconcile tick (spec §4.10).
//!
//! Grounded in the teacher's `agent/trigger.rs` condition/action shape:
//! a small enum of fire conditions evaluated against "now" and a
//! last-fired timestamp, persisted alongside the want rather than
//! recomputed from scratch every tick.

use chrono::{DateTime, Duration, Utc};

use crate::error::SchedulerError;
use crate::want::ScheduleSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fires once at the given instant, then never again.
    At(DateTime<Utc>),
    /// Fires every `period`, first firing `period` after `anchor`.
    Every { anchor: DateTime<Utc>, period: Duration },
}

/// Parses a `duration-string` of the form `"<N> <unit>"` with
/// `unit ∈ {second(s), minute(s), hour(s), day(s)}` (spec §4.10).
pub fn parse_duration(value: &str) -> Result<Duration, SchedulerError> {
    let trimmed = value.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let (Some(amount_str), Some(unit_str)) = (parts.next(), parts.next()) else {
        return Err(SchedulerError::InvalidDuration { value: value.to_string() });
    };
    let amount: i64 = amount_str
        .parse()
        .map_err(|_| SchedulerError::InvalidDuration { value: value.to_string() })?;
    let unit = unit_str.trim().to_lowercase();
    let duration = match unit.as_str() {
        "second" | "seconds" => Duration::seconds(amount),
        "minute" | "minutes" => Duration::minutes(amount),
        "hour" | "hours" => Duration::hours(amount),
        "day" | "days" => Duration::days(amount),
        _ => return Err(SchedulerError::InvalidDuration { value: value.to_string() }),
    };
    Ok(duration)
}

/// Parses an `at` anchor, which is either an RFC3339 timestamp or a bare
/// `"HH:MM"` time-of-day interpreted as the next occurrence of that time
/// on or after `reference`.
pub fn parse_at(value: &str, reference: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let Some((hour_str, minute_str)) = value.split_once(':') else {
        return Err(SchedulerError::InvalidAnchor { value: value.to_string() });
    };
    let hour: u32 = hour_str.parse().map_err(|_| SchedulerError::InvalidAnchor { value: value.to_string() })?;
    let minute: u32 = minute_str.parse().map_err(|_| SchedulerError::InvalidAnchor { value: value.to_string() })?;
    let today = reference
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| SchedulerError::InvalidAnchor { value: value.to_string() })?
        .and_utc();
    if today >= reference {
        Ok(today)
    } else {
        Ok(today + Duration::days(1))
    }
}

/// Parses a `spec.when` entry. An `at` anchor without `every` is a one-shot
/// fire. `every` without `at` fires first at `initialized_at + every` (spec
/// §8 boundary behaviour). Both set fires at `at`, then every `every`.
pub fn parse_schedule(
    entry: &ScheduleSpec,
    initialized_at: DateTime<Utc>,
) -> Result<Schedule, SchedulerError> {
    match (&entry.at, &entry.every) {
        (Some(at), None) => Ok(Schedule::At(parse_at(at, initialized_at)?)),
        (None, Some(every)) => {
            let period = parse_duration(every)?;
            Ok(Schedule::Every { anchor: initialized_at, period })
        }
        (Some(at), Some(every)) => {
            let anchor = parse_at(at, initialized_at)?;
            let period = parse_duration(every)?;
            Ok(Schedule::Every { anchor, period })
        }
        (None, None) => Err(SchedulerError::InvalidDuration { value: String::new() }),
    }
}

/// Tracks the next-fire time for one schedule entry, advancing it every
/// time `is_due` reports a fire.
pub struct ScheduleState {
    schedule: Schedule,
    next_fire: DateTime<Utc>,
    fired_once: bool,
}

impl ScheduleState {
    pub fn new(schedule: Schedule) -> Self {
        let next_fire = match &schedule {
            Schedule::At(at) => *at,
            Schedule::Every { anchor, period } => *anchor + *period,
        };
        Self { schedule, next_fire, fired_once: false }
    }

    /// Returns `true` on a reconcile tick iff `now >= next_fire`. After
    /// firing, `Every` schedules advance by `period`; `At` schedules fire
    /// exactly once.
    pub fn is_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.fired_once {
            if let Schedule::At(_) = self.schedule {
                return false;
            }
        }
        if now < self.next_fire {
            return false;
        }
        self.fired_once = true;
        if let Schedule::Every { period, .. } = &self.schedule {
            self.next_fire += *period;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_plural_and_singular_units() {
        assert_eq!(parse_duration("5 seconds").unwrap(), Duration::seconds(5));
        assert_eq!(parse_duration("1 second").unwrap(), Duration::seconds(1));
        assert_eq!(parse_duration("2 minutes").unwrap(), Duration::minutes(2));
        assert_eq!(parse_duration("3 hours").unwrap(), Duration::hours(3));
        assert_eq!(parse_duration("1 day").unwrap(), Duration::days(1));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_duration("5 fortnights").is_err());
    }

    #[test]
    fn every_without_at_fires_first_at_init_plus_every() {
        let entry = ScheduleSpec { at: None, every: Some("10 seconds".to_string()) };
        let schedule = parse_schedule(&entry, now()).unwrap();
        let mut state = ScheduleState::new(schedule);
        assert!(!state.is_due(now() + Duration::seconds(5)));
        assert!(state.is_due(now() + Duration::seconds(10)));
    }

    #[test]
    fn every_schedule_refires_after_period() {
        let entry = ScheduleSpec { at: None, every: Some("10 seconds".to_string()) };
        let schedule = parse_schedule(&entry, now()).unwrap();
        let mut state = ScheduleState::new(schedule);
        assert!(state.is_due(now() + Duration::seconds(10)));
        assert!(!state.is_due(now() + Duration::seconds(15)));
        assert!(state.is_due(now() + Duration::seconds(20)));
    }

    #[test]
    fn at_only_schedule_fires_once() {
        let entry = ScheduleSpec { at: Some("2026-01-01T00:00:05Z".to_string()), every: None };
        let schedule = parse_schedule(&entry, now()).unwrap();
        let mut state = ScheduleState::new(schedule);
        assert!(state.is_due(now() + Duration::seconds(5)));
        assert!(!state.is_due(now() + Duration::seconds(100)));
    }

    #[test]
    fn hhmm_anchor_rolls_to_next_day_if_in_past() {
        let reference = now() + Duration::hours(12); // noon
        let at = parse_at("06:00", reference).unwrap();
        assert!(at > reference);
    }
}
