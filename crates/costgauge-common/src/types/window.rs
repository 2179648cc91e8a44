//! Export window definitions

use super::date_range::{DateRange, Granularity};
use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a window keys its aggregate, and therefore which gauge it exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Whole-range total per group key (`cost_total{group_key}`)
    Total,
    /// Per-date amount per group key (`cost_by_date{date, group_key}`)
    #[default]
    ByDate,
    /// Ungrouped per-period totals (`cost_by_period{period}`)
    ByPeriod,
}

impl KeyMode {
    /// Whether the upstream query needs a tag grouping
    pub fn is_grouped(&self) -> bool {
        !matches!(self, KeyMode::ByPeriod)
    }
}

/// A named export cycle: what range to query, how often, and where to serve it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowDefinition {
    pub id: String,
    /// Days before today included in the range
    pub lookback_days: u32,
    pub granularity: Granularity,
    pub interval_seconds: u64,
    pub endpoint_port: u16,
    #[serde(default)]
    pub key_mode: KeyMode,
    /// Fixed range start; overrides `lookback_days`
    #[serde(default)]
    pub since: Option<NaiveDate>,
    /// Drop label-sets that disappear from upstream data
    #[serde(default)]
    pub expire_stale: bool,
}

impl WindowDefinition {
    pub fn new(
        id: impl Into<String>,
        lookback_days: u32,
        granularity: Granularity,
        interval_seconds: u64,
        endpoint_port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            lookback_days,
            granularity,
            interval_seconds,
            endpoint_port,
            key_mode: KeyMode::default(),
            since: None,
            expire_stale: false,
        }
    }

    pub fn with_key_mode(mut self, key_mode: KeyMode) -> Self {
        self.key_mode = key_mode;
        self
    }

    pub fn with_since(mut self, since: NaiveDate) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_expire_stale(mut self, expire_stale: bool) -> Self {
        self.expire_stale = expire_stale;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Date range this window covers when evaluated on `today`
    pub fn range_for(&self, today: NaiveDate) -> DateRange {
        match self.since {
            Some(since) => DateRange::since(since, today),
            None => DateRange::trailing(today, self.lookback_days),
        }
    }

    /// Check invariants that do not depend on other windows
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("window id is required".into()));
        }
        if self.interval_seconds == 0 {
            return Err(Error::Config(format!(
                "window {}: interval_seconds must be positive",
                self.id
            )));
        }
        if self.endpoint_port == 0 {
            return Err(Error::Config(format!(
                "window {}: endpoint_port must be set",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_range_for_lookback() {
        let window = WindowDefinition::new("weekly", 7, Granularity::Daily, 900, 3001);
        let range = window.range_for(date(2024, 5, 12));
        assert_eq!(range.start(), date(2024, 5, 5));
        assert_eq!(range.end(), date(2024, 5, 12));
    }

    #[test]
    fn test_range_for_since_overrides_lookback() {
        let window = WindowDefinition::new("all-time", 7, Granularity::Monthly, 900, 5002)
            .with_since(date(2024, 5, 5));
        let range = window.range_for(date(2024, 9, 1));
        assert_eq!(range.start(), date(2024, 5, 5));
    }

    #[test]
    fn test_validate() {
        assert!(WindowDefinition::new("w", 7, Granularity::Daily, 0, 3001)
            .validate()
            .is_err());
        assert!(WindowDefinition::new(" ", 7, Granularity::Daily, 60, 3001)
            .validate()
            .is_err());
        assert!(WindowDefinition::new("w", 7, Granularity::Daily, 60, 0)
            .validate()
            .is_err());
        assert!(WindowDefinition::new("w", 0, Granularity::Daily, 60, 3001)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_by_period_is_ungrouped() {
        assert!(!KeyMode::ByPeriod.is_grouped());
        assert!(KeyMode::Total.is_grouped());
    }
}
