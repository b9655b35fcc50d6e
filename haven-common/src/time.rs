//! Timestamp and calendar utilities
//!
//! Usage counters roll over by comparing stored calendar keys against the
//! current day or week. All keys are computed in UTC.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use std::sync::Mutex;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Calendar day key (`YYYY-MM-DD`) used for the solo-session counter
pub fn day_key(at: DateTime<Utc>) -> String {
    at.date_naive().format("%Y-%m-%d").to_string()
}

/// Week key used for the insight counter: the date of the Monday that starts
/// the ISO week containing `at`.
pub fn week_key(at: DateTime<Utc>) -> String {
    let date = at.date_naive();
    let offset = date.weekday().num_days_from_monday() as i64;
    let monday: NaiveDate = date - Duration::days(offset);
    monday.format("%Y-%m-%d").to_string()
}

/// Advance a billing-period boundary by whole calendar months
///
/// Month arithmetic clamps to the last day of shorter months (Jan 31 + 1 month
/// = Feb 28/29).
pub fn add_months(at: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    at.checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Source of the current time
///
/// Injected into everything that compares against "today" so rollover
/// behavior is deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(at),
        }
    }

    /// Jump to an absolute instant
    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut current) = self.current.lock() {
            *current = at;
        }
    }

    /// Move forward by `delta`
    pub fn advance(&self, delta: Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += delta;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01
    }

    #[test]
    fn test_millis_to_duration_one_second() {
        assert_eq!(millis_to_duration(1000), std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_day_key_is_utc_date() {
        assert_eq!(day_key(at(2026, 3, 9, 23)), "2026-03-09");
        assert_eq!(day_key(at(2026, 3, 10, 0)), "2026-03-10");
    }

    #[test]
    fn test_week_key_is_monday_of_iso_week() {
        // 2026-03-09 is a Monday
        assert_eq!(week_key(at(2026, 3, 9, 8)), "2026-03-09");
        assert_eq!(week_key(at(2026, 3, 15, 22)), "2026-03-09");
        assert_eq!(week_key(at(2026, 3, 16, 0)), "2026-03-16");
    }

    #[test]
    fn test_week_key_crosses_year_boundary() {
        // 2027-01-01 is a Friday, its week starts on 2026-12-28
        assert_eq!(week_key(at(2027, 1, 1, 12)), "2026-12-28");
    }

    #[test]
    fn test_add_months_clamps_to_month_end() {
        let end = add_months(at(2026, 1, 31, 10), 1);
        assert_eq!(day_key(end), "2026-02-28");
        assert_eq!(day_key(add_months(at(2026, 1, 31, 10), 12)), "2027-01-31");
    }

    #[test]
    fn test_fixed_clock_advance() {
        let clock = FixedClock::new(at(2026, 5, 1, 9));
        clock.advance(Duration::days(1));
        assert_eq!(day_key(clock.now()), "2026-05-02");

        clock.set(at(2026, 6, 1, 0));
        assert_eq!(day_key(clock.now()), "2026-06-01");
    }
}
