//! Cost records and pages returned by the billing API

use crate::error::{Error, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One (period, group) cost line from a single API page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Start of the bucket this amount belongs to
    pub period_start: NaiveDate,
    /// Grouping key value (e.g. the `User` tag)
    pub group_key: String,
    /// Non-negative amount in the account currency
    pub amount: Decimal,
}

impl CostRecord {
    /// Create a record, rejecting negative amounts
    pub fn new(period_start: NaiveDate, group_key: impl Into<String>, amount: Decimal) -> Result<Self> {
        let group_key = group_key.into();
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(Error::Upstream(format!(
                "negative amount {} for {} on {}",
                amount, group_key, period_start
            )));
        }
        Ok(Self {
            period_start,
            group_key,
            amount,
        })
    }
}

/// A page of records plus the token for the next page, if any
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<CostRecord>,
    pub next_token: Option<String>,
}

impl Page {
    pub fn new(records: Vec<CostRecord>, next_token: Option<String>) -> Self {
        // Some APIs send "" instead of omitting the token
        let next_token = next_token.filter(|t| !t.is_empty());
        Self {
            records,
            next_token,
        }
    }

    /// A page with no continuation
    pub fn last(records: Vec<CostRecord>) -> Self {
        Self::new(records, None)
    }

    pub fn has_more(&self) -> bool {
        self.next_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_negative_amount_rejected() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 5).unwrap();
        assert!(CostRecord::new(day, "alice", dec!(-0.01)).is_err());
        assert!(CostRecord::new(day, "alice", dec!(0)).is_ok());
        assert!(CostRecord::new(day, "alice", dec!(10.00)).is_ok());
    }

    #[test]
    fn test_empty_token_means_last_page() {
        let page = Page::new(Vec::new(), Some(String::new()));
        assert!(!page.has_more());

        let page = Page::new(Vec::new(), Some("abc".into()));
        assert!(page.has_more());
    }
}
