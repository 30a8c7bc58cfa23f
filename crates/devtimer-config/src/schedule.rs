//! Weekly schedule entries: parsing, formatting and conflict detection
//!
//! Wire format: `Day,HH:MM-HH:MM,Limit`, e.g. `Mon,14:00-18:00,60`.
//! `Limit` is in minutes, `0` meaning unlimited. A window whose end is
//! earlier than its start wraps past midnight.

use chrono::Weekday;
use devtimer_util::{MinuteRange, format_minute_of_day, parse_weekday_abbrev, weekday_abbrev};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from schedule parsing and conflict detection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Invalid format: {value} ({reason})")]
    Format { value: String, reason: &'static str },

    #[error("Overlapping schedules on {weekday}: {first} and {second}")]
    Conflict {
        weekday: Weekday,
        first: String,
        second: String,
    },
}

impl ScheduleError {
    fn format(value: &str, reason: &'static str) -> Self {
        Self::Format {
            value: value.to_string(),
            reason,
        }
    }
}

/// One allowed window on one weekday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleEntry {
    pub weekday: Weekday,
    /// Minute of day the window opens, `0..1440`
    pub start_minute: u16,
    /// Minute of day the window closes (exclusive), `0..1440`
    pub end_minute: u16,
    /// Minutes allowed inside the window; `0` is unlimited
    pub limit_minutes: u32,
}

impl ScheduleEntry {
    pub fn is_unlimited(&self) -> bool {
        self.limit_minutes == 0
    }

    pub fn is_overnight(&self) -> bool {
        self.start_minute > self.end_minute
    }

    /// The window as half-open ranges on the minute axis of its weekday.
    pub fn ranges(&self) -> impl Iterator<Item = MinuteRange> {
        MinuteRange::split_window(self.start_minute, self.end_minute)
    }

    /// Whether `minute` of this entry's weekday falls inside the window.
    pub fn covers(&self, minute: u16) -> bool {
        self.ranges().any(|r| r.contains(minute))
    }

    /// Two entries conflict when they share a weekday and any of their
    /// ranges intersect.
    pub fn conflicts_with(&self, other: &ScheduleEntry) -> bool {
        self.weekday == other.weekday
            && self
                .ranges()
                .any(|a| other.ranges().any(|b| a.overlaps(&b)))
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}-{},{}",
            weekday_abbrev(self.weekday),
            format_minute_of_day(self.start_minute),
            format_minute_of_day(self.end_minute),
            self.limit_minutes
        )
    }
}

impl FromStr for ScheduleEntry {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split(',');
        let (Some(day), Some(range), Some(limit), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(ScheduleError::format(s, "expected Day,HH:MM-HH:MM,Limit"));
        };

        let weekday = parse_weekday_abbrev(day)
            .ok_or_else(|| ScheduleError::format(s, "day must be one of Mon..Sun"))?;

        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| ScheduleError::format(s, "time range must be HH:MM-HH:MM"))?;
        let start_minute =
            parse_clock(start).ok_or_else(|| ScheduleError::format(s, "invalid start time"))?;
        let end_minute =
            parse_clock(end).ok_or_else(|| ScheduleError::format(s, "invalid end time"))?;

        let limit_minutes = parse_limit(limit)
            .ok_or_else(|| ScheduleError::format(s, "limit must be 0 or a positive number of minutes"))?;

        Ok(Self {
            weekday,
            start_minute,
            end_minute,
            limit_minutes,
        })
    }
}

/// Parse a 24-hour clock time into minute-of-day.
///
/// The hour may have one or two digits (`9:05`, `09:05`); the minute must
/// have exactly two.
pub fn parse_clock(s: &str) -> Option<u16> {
    let (hour, minute) = s.split_once(':')?;
    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return None;
    }
    if !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hour: u16 = hour.parse().ok()?;
    let minute: u16 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 60 + minute)
}

fn parse_limit(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

/// Find the first pair of conflicting entries.
///
/// Entries are grouped by weekday in order of first appearance; within a
/// group, pairs are visited with the outer index before the inner one.
pub fn find_conflict(entries: &[ScheduleEntry]) -> Option<(usize, usize)> {
    let mut groups: Vec<(Weekday, Vec<usize>)> = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        match groups.iter_mut().find(|(day, _)| *day == entry.weekday) {
            Some((_, members)) => members.push(idx),
            None => groups.push((entry.weekday, vec![idx])),
        }
    }

    for (_, members) in &groups {
        for (pos, &i) in members.iter().enumerate() {
            for &j in &members[pos + 1..] {
                if entries[i].conflicts_with(&entries[j]) {
                    return Some((i, j));
                }
            }
        }
    }
    None
}

/// Parse a device's schedule list and reject overlapping windows.
///
/// Blank strings are skipped. The first malformed entry, or else the first
/// conflicting pair, is reported with the strings as the caller wrote them.
pub fn validate_schedule<S: AsRef<str>>(raw: &[S]) -> Result<Vec<ScheduleEntry>, ScheduleError> {
    let mut sources = Vec::with_capacity(raw.len());
    let mut entries = Vec::with_capacity(raw.len());

    for value in raw.iter().map(AsRef::as_ref).filter(|v| !v.trim().is_empty()) {
        entries.push(value.parse::<ScheduleEntry>()?);
        sources.push(value);
    }

    if let Some((i, j)) = find_conflict(&entries) {
        return Err(ScheduleError::Conflict {
            weekday: entries[i].weekday,
            first: sources[i].to_string(),
            second: sources[j].to_string(),
        });
    }

    Ok(entries)
}
