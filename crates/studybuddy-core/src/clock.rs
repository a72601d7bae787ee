//! Calendar-day resolution for daily quota resets.
//!
//! Every reset comparison in the crate goes through a [`UsageClock`], and the
//! production clock uses the device-local calendar. Mixing UTC and local days
//! is what produces off-by-one resets, so nothing else should call
//! `chrono::Local::now()` for quota purposes.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// A calendar day, serialized as an ISO `YYYY-MM-DD` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn pred(&self) -> Self {
        Self(self.0.pred_opt().unwrap_or(self.0))
    }

    pub fn succ(&self) -> Self {
        Self(self.0.succ_opt().unwrap_or(self.0))
    }

    /// Local midnight at which this day's counters roll over.
    pub fn next_reset(&self) -> Option<DateTime<Utc>> {
        let midnight = self.succ().0.and_hms_opt(0, 0, 0)?;
        Local
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl std::str::FromStr for DateKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

/// Resolves "today". No side effects, no errors.
pub trait UsageClock: Send + Sync {
    fn today(&self) -> DateKey;
}

/// Device-local calendar day.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl UsageClock for LocalClock {
    fn today(&self) -> DateKey {
        DateKey(Local::now().date_naive())
    }
}

/// A clock pinned to a settable day. Used by tests and by previews.
#[derive(Debug)]
pub struct FixedClock {
    day: Mutex<DateKey>,
}

impl FixedClock {
    pub fn new(day: DateKey) -> Self {
        Self {
            day: Mutex::new(day),
        }
    }

    pub fn set(&self, day: DateKey) {
        if let Ok(mut guard) = self.day.lock() {
            *guard = day;
        }
    }

    pub fn advance_day(&self) {
        if let Ok(mut guard) = self.day.lock() {
            *guard = guard.succ();
        }
    }
}

impl UsageClock for FixedClock {
    fn today(&self) -> DateKey {
        match self.day.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_key_serializes_as_iso_string() {
        let key = DateKey::from_ymd(2024, 3, 9).unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"2024-03-09\"");
        assert_eq!(key.to_string(), "2024-03-09");

        let parsed: DateKey = "2024-03-09".parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(DateKey::from_ymd(2024, 12, 31).unwrap());
        clock.advance_day();
        assert_eq!(clock.today(), DateKey::from_ymd(2025, 1, 1).unwrap());
    }

    #[test]
    fn test_ordering_follows_calendar() {
        let today = DateKey::from_ymd(2024, 5, 10).unwrap();
        assert!(today.pred() < today);
        assert!(today.succ() > today);
    }

    #[test]
    fn test_next_reset_is_after_today() {
        let today = LocalClock.today();
        let reset = today.next_reset().unwrap();
        assert!(reset > Utc::now());
    }
}
