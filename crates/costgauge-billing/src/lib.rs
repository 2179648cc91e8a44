//! # Costgauge Billing
//!
//! Billing API access and cost aggregation for costgauge.
//!
//! ## Flow
//!
//! ```text
//! CostQuery -> BillingClient::fetch_page (per page) -> fetch_all -> aggregate
//! ```
//!
//! - [`client::BillingClient`]: one-page fetch contract, continuation token
//!   passed explicitly
//! - [`explorer::CostExplorerClient`]: AWS Cost Explorer implementation
//! - [`metering::CostAggregator`]: depaginates and sums per key

pub mod client;
pub mod explorer;
pub mod metering;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{BillingClient, CostMetric, CostQuery};
pub use explorer::{CostExplorerClient, CostExplorerConfig, Credentials};
pub use metering::{AggregateResult, CostAggregator, WindowAggregate};
