//! Source of "today" for normalization defaults.

use chrono::{Local, NaiveDate};

/// Supplies the current calendar date.
///
/// Normalization never reads global time directly so that the defaults it
/// applies (current year, today's date) are reproducible in tests.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Clock backed by the local system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a single date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl FixedClock {
    /// Returns `None` for an invalid calendar date.
    pub fn ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::ymd(2024, 3, 15).unwrap();
        assert_eq!(clock.today().to_string(), "2024-03-15");
    }

    #[test]
    fn test_fixed_clock_rejects_invalid_date() {
        assert!(FixedClock::ymd(2024, 2, 30).is_none());
    }
}
