//! Schedule evaluation: decides whether a schedule item is due to start or
//! stop at a given instant.
//!
//! Windows are always anchored to the date of `now`. A window whose end
//! crosses midnight is computed with plain date arithmetic, but a window
//! that should begin before midnight and still be running after it needs
//! two items.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Weekday};
use thiserror::Error;

use crate::config::ScheduleItem;
use crate::mqtt::DesiredState;

const START_TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("malformed start time '{value}': {reason}")]
    StartTime { value: String, reason: String },
    #[error("start time {time} does not exist on {date} in the local timezone")]
    NonexistentLocalTime { time: NaiveTime, date: chrono::NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
}

impl Transition {
    pub fn desired_state(self) -> DesiredState {
        match self {
            Transition::Start => DesiredState::On,
            Transition::Stop => DesiredState::Off,
        }
    }
}

/// Start and end of a schedule item's window on a given day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window<Tz: TimeZone> {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

/// Whether `day` is enabled in a weekday mask (Sunday = bit 0 .. Saturday = bit 6).
pub fn is_day_enabled(weekdays: u8, day: Weekday) -> bool {
    let bit = 1u8 << day.num_days_from_sunday();
    weekdays & bit != 0
}

pub(crate) fn parse_start_time(value: &str) -> Result<NaiveTime, ScheduleParseError> {
    NaiveTime::parse_from_str(value, START_TIME_FORMAT).map_err(|e| {
        ScheduleParseError::StartTime {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Compute the item's window on the date of `now`, in `now`'s timezone.
pub fn window_for<Tz>(item: &ScheduleItem, now: &DateTime<Tz>) -> Result<Window<Tz>, ScheduleParseError>
where
    Tz: TimeZone,
{
    let time = parse_start_time(&item.start_time)?;
    let date = now.date_naive();

    // Ambiguous local times (DST fall-back) resolve to the earlier instant.
    let start = date
        .and_time(time)
        .and_local_timezone(now.timezone())
        .earliest()
        .ok_or(ScheduleParseError::NonexistentLocalTime { time, date })?;
    let end = start.clone() + Duration::minutes(i64::from(item.duration_minutes));

    Ok(Window { start, end })
}

/// Decide the transition due for `item` at `now`, given whether the zone is
/// currently understood to be running.
///
/// - `Start` when `start < now < end` and the zone is inactive.
/// - `Stop` when `now >= end` and the zone is active.
/// - `None` on a disabled weekday or when already in the right state.
pub fn evaluate<Tz>(
    item: &ScheduleItem,
    active: bool,
    now: &DateTime<Tz>,
) -> Result<Option<Transition>, ScheduleParseError>
where
    Tz: TimeZone,
{
    if !is_day_enabled(item.weekdays, now.weekday()) {
        return Ok(None);
    }

    let window = window_for(item, now)?;

    if *now > window.start && *now < window.end && !active {
        Ok(Some(Transition::Start))
    } else if *now >= window.end && active {
        Ok(Some(Transition::Stop))
    } else {
        Ok(None)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
