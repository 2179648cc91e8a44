//! Calendar date ranges and reporting granularity

use crate::error::{Error, Result};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inclusive range of UTC calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// `{today - lookback_days, today}`
    pub fn trailing(today: NaiveDate, lookback_days: u32) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// `{since, today}`, clamped so a future `since` yields a single-day range
    pub fn since(since: NaiveDate, today: NaiveDate) -> Self {
        Self {
            start: since.min(today),
            end: today,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered, counting both ends
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Exclusive end date for APIs that treat the end of a period as open.
    ///
    /// Equal to `end` unless the range is a single day, in which case the
    /// end is pushed one day forward so the upstream period is non-empty.
    pub fn exclusive_end(&self) -> NaiveDate {
        if self.start == self.end {
            self.end.checked_add_days(Days::new(1)).unwrap_or(self.end)
        } else {
            self.end
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Time bucket size used by the billing API before grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    #[default]
    #[serde(alias = "daily", alias = "Daily")]
    Daily,
    #[serde(alias = "monthly", alias = "Monthly")]
    Monthly,
}

impl Granularity {
    /// Wire form expected by Cost Explorer
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "DAILY",
            Granularity::Monthly => "MONTHLY",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Granularity::Daily),
            "monthly" => Ok(Granularity::Monthly),
            other => Err(Error::Config(format!("unknown granularity: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted_range() {
        assert!(DateRange::new(date(2024, 5, 6), date(2024, 5, 5)).is_err());
        assert!(DateRange::new(date(2024, 5, 5), date(2024, 5, 5)).is_ok());
    }

    #[test]
    fn test_trailing_range() {
        let range = DateRange::trailing(date(2024, 5, 8), 7);
        assert_eq!(range.start(), date(2024, 5, 1));
        assert_eq!(range.end(), date(2024, 5, 8));
        assert_eq!(range.days(), 8);
    }

    #[test]
    fn test_zero_lookback_widens_exclusive_end() {
        let range = DateRange::trailing(date(2024, 5, 8), 0);
        assert_eq!(range.start(), range.end());
        assert_eq!(range.exclusive_end(), date(2024, 5, 9));

        let week = DateRange::trailing(date(2024, 5, 8), 7);
        assert_eq!(week.exclusive_end(), date(2024, 5, 8));
    }

    #[test]
    fn test_since_clamps_future_start() {
        let range = DateRange::since(date(2030, 1, 1), date(2024, 5, 8));
        assert_eq!(range.start(), date(2024, 5, 8));
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!("daily".parse::<Granularity>().unwrap(), Granularity::Daily);
        assert_eq!("MONTHLY".parse::<Granularity>().unwrap(), Granularity::Monthly);
        assert!("hourly".parse::<Granularity>().is_err());
        assert_eq!(serde_json::to_string(&Granularity::Daily).unwrap(), "\"DAILY\"");
    }
}
