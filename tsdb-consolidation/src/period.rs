//! Period (window) arithmetic.
//!
//! Consolidation works on canonical, non-overlapping 6-hour windows aligned
//! to 00:00, 06:00, 12:00 and 18:00 UTC. Daily rollups use whole UTC days.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PERIOD_HOURS: i64 = 6;

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// One consolidation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    /// The window containing `ts`.
    pub fn containing(ts: DateTime<Utc>) -> Self {
        let start = floor_to_period(ts);
        Self {
            start,
            end: start + Duration::hours(PERIOD_HOURS),
        }
    }

    /// The most recently closed window as of `now`.
    pub fn last_closed(now: DateTime<Utc>) -> Self {
        Self::containing(now).previous()
    }

    pub fn next(&self) -> Self {
        Self {
            start: self.end,
            end: self.end + Duration::hours(PERIOD_HOURS),
        }
    }

    pub fn previous(&self) -> Self {
        Self {
            start: self.start - Duration::hours(PERIOD_HOURS),
            end: self.start,
        }
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }

    /// `YYYY-MM-DD-night|morning|afternoon|evening`
    pub fn label(&self) -> String {
        let part = match self.start.hour() {
            0..=5 => "night",
            6..=11 => "morning",
            12..=17 => "afternoon",
            _ => "evening",
        };
        format!("{}-{}", self.start.format("%Y-%m-%d"), part)
    }

    /// Suffix used in deterministic summary ids: `YYYYMMDD_HH`.
    pub fn id_suffix(&self) -> String {
        self.start.format("%Y%m%d_%H").to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%Y-%m-%dT%H:%M"),
            self.end.format("%Y-%m-%dT%H:%M")
        )
    }
}

/// One UTC calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Day {
    pub start: DateTime<Utc>,
}

impl Day {
    pub fn containing(ts: DateTime<Utc>) -> Self {
        Self {
            start: start_of_day(ts),
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::days(1)
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end())
    }

    pub fn previous(&self) -> Self {
        Self {
            start: self.start - Duration::days(1),
        }
    }

    pub fn next(&self) -> Self {
        Self { start: self.end() }
    }

    /// The four basic windows inside this day.
    pub fn periods(&self) -> Vec<Period> {
        let mut out = Vec::with_capacity(4);
        let mut p = Period::containing(self.start);
        while p.start < self.end() {
            out.push(p);
            p = p.next();
        }
        out
    }

    pub fn label(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn id_suffix(&self) -> String {
        self.start.format("%Y%m%d").to_string()
    }
}

pub fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts.date_naive().and_time(NaiveTime::MIN))
}

/// Floor `ts` to the enclosing 6-hour boundary.
pub fn floor_to_period(ts: DateTime<Utc>) -> DateTime<Utc> {
    let hour = (ts.hour() as i64 / PERIOD_HOURS) * PERIOD_HOURS;
    start_of_day(ts) + Duration::hours(hour)
}

/// Ceil `now` to the next 6-hour boundary. A timestamp that is exactly on a
/// boundary schedules the following one.
pub fn next_run(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_to_period(now) + Duration::hours(PERIOD_HOURS)
}

pub fn is_first_of_month(ts: DateTime<Utc>) -> bool {
    ts.day() == 1
}
