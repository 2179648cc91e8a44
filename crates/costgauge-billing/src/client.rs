//! Billing client contract
//!
//! The aggregator only needs one operation from the billing API: fetch a single
//! page for a query, given the continuation token of the previous page.

use async_trait::async_trait;
use costgauge_common::{DateRange, Granularity, Page, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cost metric requested from the billing API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CostMetric {
    #[default]
    BlendedCost,
    UnblendedCost,
    AmortizedCost,
}

impl CostMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostMetric::BlendedCost => "BlendedCost",
            CostMetric::UnblendedCost => "UnblendedCost",
            CostMetric::AmortizedCost => "AmortizedCost",
        }
    }
}

impl fmt::Display for CostMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that identifies one depaginated query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostQuery {
    pub range: DateRange,
    pub granularity: Granularity,
    /// Tag to group by; `None` asks for ungrouped totals
    pub group_by: Option<String>,
    pub metric: CostMetric,
}

impl CostQuery {
    pub fn new(range: DateRange, granularity: Granularity) -> Self {
        Self {
            range,
            granularity,
            group_by: None,
            metric: CostMetric::default(),
        }
    }

    pub fn grouped_by(mut self, tag: impl Into<String>) -> Self {
        self.group_by = Some(tag.into());
        self
    }

    pub fn with_metric(mut self, metric: CostMetric) -> Self {
        self.metric = metric;
        self
    }
}

/// Source of paginated cost records.
///
/// Implementations hold no per-query state: the continuation token is passed
/// explicitly, so one client can be shared by every window.
#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Client name for logs (e.g. "cost-explorer")
    fn name(&self) -> &'static str;

    /// Fetch one page of records.
    ///
    /// # Errors
    ///
    /// Returns `Error::Upstream` when the remote call fails or the payload
    /// cannot be parsed. Errors are not retried here.
    async fn fetch_page(&self, query: &CostQuery, token: Option<&str>) -> Result<Page>;
}
