//! Wall-clock helpers for device-timer
//!
//! Schedules are expressed in minutes of the local day, so everything here
//! works on local time. Usage counters are keyed by "usage day", which starts
//! at a configurable local reset time (midnight by default).
//!
//! # Mock Time for Development
//!
//! In debug builds, `DEVICE_TIMER_MOCK_TIME` overrides the clock for every
//! caller of [`now`]. The mock clock keeps ticking at real speed from the
//! given instant.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "DEVICE_TIMER_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Number of minutes in a day; the exclusive upper bound of minute-of-day.
pub const MINUTES_PER_DAY: u16 = 1440;

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

fn mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        if !cfg!(debug_assertions) {
            return None;
        }

        let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
        let Ok(naive) = NaiveDateTime::parse_from_str(&raw, MOCK_TIME_FORMAT) else {
            tracing::warn!(
                mock_time = %raw,
                expected_format = MOCK_TIME_FORMAT,
                "Invalid mock time format"
            );
            return None;
        };
        let Some(mock) = Local.from_local_datetime(&naive).single() else {
            tracing::warn!(mock_time = %raw, "Mock time is ambiguous in the local timezone");
            return None;
        };

        let offset = mock.signed_duration_since(Local::now());
        tracing::info!(mock_time = %raw, offset_secs = offset.num_seconds(), "Mock time enabled");
        Some(offset)
    })
}

/// Current local time, honoring `DEVICE_TIMER_MOCK_TIME` in debug builds.
pub fn now() -> DateTime<Local> {
    let real = Local::now();
    match mock_time_offset() {
        Some(offset) => real + offset,
        None => real,
    }
}

/// Minute of the local day, `0..1440`.
pub fn minute_of_day(dt: &DateTime<Local>) -> u16 {
    (dt.hour() * 60 + dt.minute()) as u16
}

/// The usage day `dt` belongs to, given the local time at which counters reset.
///
/// With the default reset at midnight this is simply the calendar date. With a
/// later reset (say 04:00), the small hours still count toward the previous day.
pub fn usage_day(dt: &DateTime<Local>, reset_at: NaiveTime) -> NaiveDate {
    let date = dt.date_naive();
    if dt.time() < reset_at {
        date.checked_sub_days(Days::new(1)).unwrap_or(date)
    } else {
        date
    }
}

/// Three-letter English abbreviation used in schedule strings.
pub fn weekday_abbrev(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// Parse an exact three-letter weekday abbreviation (`Mon`..`Sun`).
pub fn parse_weekday_abbrev(s: &str) -> Option<Weekday> {
    match s {
        "Mon" => Some(Weekday::Mon),
        "Tue" => Some(Weekday::Tue),
        "Wed" => Some(Weekday::Wed),
        "Thu" => Some(Weekday::Thu),
        "Fri" => Some(Weekday::Fri),
        "Sat" => Some(Weekday::Sat),
        "Sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Half-open range of minutes within one day: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteRange {
    pub start: u16,
    pub end: u16,
}

impl MinuteRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Split a daily window into ranges on the minute axis.
    ///
    /// `start <= end` yields `[start, end)`. An overnight window
    /// (`start > end`) yields `[start, 1440)` followed by `[0, end)`.
    pub fn split_window(start: u16, end: u16) -> impl Iterator<Item = MinuteRange> {
        let (first, second) = if start <= end {
            (MinuteRange::new(start, end), None)
        } else {
            (
                MinuteRange::new(start, MINUTES_PER_DAY),
                Some(MinuteRange::new(0, end)),
            )
        };
        std::iter::once(first).chain(second)
    }

    pub fn contains(&self, minute: u16) -> bool {
        self.start <= minute && minute < self.end
    }

    pub fn overlaps(&self, other: &MinuteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn len(&self) -> u16 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Format a minute-of-day as zero-padded `HH:MM`.
pub fn format_minute_of_day(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}
