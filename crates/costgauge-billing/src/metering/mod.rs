//! Metering module
//!
//! Turns paginated billing API output into per-window aggregates:
//! - fetch_all: depaginates a query
//! - CostAggregator: groups and sums records by key

pub mod aggregator;
pub mod pagination;

pub use aggregator::{
    aggregate, by_date_and_group_key, by_group_key, by_period, merge, AggregateResult,
    CostAggregator, WindowAggregate,
};
pub use pagination::fetch_all;
