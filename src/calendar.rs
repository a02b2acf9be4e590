//! Service-day arithmetic shared by the schedule and fare pipelines.
//!
//! Two conventions meet here. GTFS writes service after midnight as hours past 24 on the
//! previous service date, while the fare system runs a 3am-to-3am operating day.

use anyhow::{Result, bail};
use chrono::{
    Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday,
};
use serde::{Deserialize, Serialize};

/// Hour at which the transit operating day rolls over.
pub const OPERATING_DAY_START_HOUR: u32 = 3;

/// Moves taps made between midnight and 3am onto the next calendar day, so that
/// differences between taps of one operating day come out positive.
pub fn apply_late_night_offset(timestamp: NaiveDateTime) -> NaiveDateTime {
    if timestamp.hour() < OPERATING_DAY_START_HOUR {
        timestamp + Duration::days(1)
    } else {
        timestamp
    }
}

/// Combines a service date with a GTFS `HH:MM:SS` time whose hour may run past 24.
///
/// `resolve_wrap_around_time(d, "25:10:00")` is 01:10 on the day after `d`.
///
/// # Errors
///
/// Returns an error if the time is not three colon-separated integers, or if the hour
/// is still out of range after unwrapping one day.
pub fn resolve_wrap_around_time(service_date: NaiveDate, time_of_day: &str) -> Result<NaiveDateTime> {
    let (hours, minutes, seconds) = split_hms(time_of_day)?;
    let (hours, next_day) = if hours >= 24 {
        (hours - 24, true)
    } else {
        (hours, false)
    };

    let Some(time) = NaiveTime::from_hms_opt(hours, minutes, seconds) else {
        bail!("Service time {time_of_day:?} is out of range");
    };

    let resolved = service_date.and_time(time);
    if next_day {
        Ok(resolved + Duration::days(1))
    } else {
        Ok(resolved)
    }
}

fn split_hms(time: &str) -> Result<(u32, u32, u32)> {
    let parse = |part: Option<&str>| -> Option<u32> { part?.trim().parse().ok() };
    let mut split = time.trim().split(':');
    match (
        parse(split.next()),
        parse(split.next()),
        parse(split.next()),
        split.next(),
    ) {
        (Some(h), Some(m), Some(s), None) => Ok((h, m, s)),
        _ => bail!("Malformed HH:MM:SS time {time:?}"),
    }
}

/// The three schedule categories used instead of literal weekdays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DayOfWeek {
    Weekday = 1,
    Saturday = 2,
    Sunday = 3,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 3] = [DayOfWeek::Weekday, DayOfWeek::Saturday, DayOfWeek::Sunday];

    /// Maps the fare system's circadian day code (1 = Sunday ... 7 = Saturday).
    pub fn from_circadian(code: u8) -> Self {
        match code {
            7 => DayOfWeek::Saturday,
            1 => DayOfWeek::Sunday,
            _ => DayOfWeek::Weekday,
        }
    }

    /// Category of a calendar date. Weekend days map to their own category.
    pub fn of_date(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
            _ => DayOfWeek::Weekday,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for DayOfWeek {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(DayOfWeek::Weekday),
            2 => Ok(DayOfWeek::Saturday),
            3 => Ok(DayOfWeek::Sunday),
            other => Err(format!("{other} is not a day-of-week category (1, 2 or 3)")),
        }
    }
}

impl From<DayOfWeek> for u8 {
    fn from(dow: DayOfWeek) -> Self {
        dow.code()
    }
}

/// First day of the month containing `date`, used as the month key.
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// First day of the month before `month`.
pub fn previous_month(month: NaiveDate) -> Option<NaiveDate> {
    first_of_month(month).checked_sub_months(Months::new(1))
}

/// Dates in `[start, end]` that fall in the `dow` category, in order.
pub fn service_dates(start: NaiveDate, end: NaiveDate, dow: DayOfWeek) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|date| *date <= end)
        .filter(|date| DayOfWeek::of_date(*date) == dow)
        .collect()
}

/// Integer `HHMM` of a timestamp, the label AVL/APC data uses for a trip.
pub fn hhmm(timestamp: NaiveDateTime) -> u32 {
    timestamp.hour() * 100 + timestamp.minute()
}

/// Time-of-day reporting period of a trip, by the `HHMM` of its first departure.
///
/// `Daily` is the whole-day total that sits alongside the periods in roll-ups.
/// Stored as its label, e.g. `0600-0859`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimePeriod {
    Daily,
    #[serde(rename = "0300-0559")]
    EarlyMorning,
    #[serde(rename = "0600-0859")]
    AmPeak,
    #[serde(rename = "0900-1359")]
    Midday,
    #[serde(rename = "1400-1559")]
    SchoolOut,
    #[serde(rename = "1600-1859")]
    PmPeak,
    #[serde(rename = "1900-2159")]
    Evening,
    #[serde(rename = "2200-0259")]
    LateNight,
}

impl TimePeriod {
    /// The periods that partition the operating day, in order.
    pub const PERIODS: [TimePeriod; 7] = [
        TimePeriod::EarlyMorning,
        TimePeriod::AmPeak,
        TimePeriod::Midday,
        TimePeriod::SchoolOut,
        TimePeriod::PmPeak,
        TimePeriod::Evening,
        TimePeriod::LateNight,
    ];

    /// Period containing an `HHMM` label. Hours past 24 wrap around.
    pub fn of_hhmm(hhmm: u32) -> Self {
        match (hhmm / 100) % 24 {
            3..=5 => TimePeriod::EarlyMorning,
            6..=8 => TimePeriod::AmPeak,
            9..=13 => TimePeriod::Midday,
            14..=15 => TimePeriod::SchoolOut,
            16..=18 => TimePeriod::PmPeak,
            19..=21 => TimePeriod::Evening,
            _ => TimePeriod::LateNight,
        }
    }
}
