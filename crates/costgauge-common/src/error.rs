//! Error types for costgauge
//!
//! A single error enum shared by the billing client, the aggregator and the
//! exporter. Cycle-level failures (`Upstream`, `Pagination`, `Publish`) are
//! caught by the scheduler; `Config` and `InvalidRange` only surface at startup.

use chrono::NaiveDate;
use thiserror::Error;

/// Result type alias using costgauge's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for costgauge operations
#[derive(Debug, Error)]
pub enum Error {
    // Billing API errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Pagination error: {0}")]
    Pagination(String),

    // Metric publisher errors
    #[error("Publish error: {0}")]
    Publish(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

impl Error {
    /// True for failures of the billing API, including broken pagination
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Pagination(_))
    }

    /// Short, stable label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Upstream(_) => "upstream",
            Error::Pagination(_) => "pagination",
            Error::Publish(_) => "publish",
            Error::Config(_) => "config",
            Error::InvalidRange { .. } => "invalid_range",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Upstream(format!("malformed payload: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Publish(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Config(err.to_string())
    }
}
