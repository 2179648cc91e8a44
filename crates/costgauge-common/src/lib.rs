//! # Costgauge Common
//!
//! Shared types and errors for the costgauge cost exporter.
//!
//! ## Core Types
//!
//! - [`DateRange`]: inclusive range of UTC calendar dates
//! - [`Granularity`]: daily or monthly upstream buckets
//! - [`CostRecord`]/[`Page`]: one page of billing API output
//! - [`WindowDefinition`]: a named, periodically exported lookback window
//! - [`KeyMode`]: how a window keys its aggregate

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use types::{
    cost_record::{CostRecord, Page},
    date_range::{DateRange, Granularity},
    window::{KeyMode, WindowDefinition},
};

/// Costgauge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default cost-allocation tag used as the grouping key
pub const DEFAULT_TAG_KEY: &str = "User";

/// Group key reported for ungrouped totals
pub const TOTAL_GROUP_KEY: &str = "total";

/// Group key reported when the tag is absent on a resource
pub const UNTAGGED_GROUP_KEY: &str = "untagged";

/// Upper bound on pages fetched in one cycle
pub const DEFAULT_MAX_PAGES: usize = 1000;

/// Default export interval (15 minutes)
pub const DEFAULT_INTERVAL_SECS: u64 = 900;
