//! AWS Cost Explorer provider
//!
//! Speaks `GetCostAndUsage` directly over HTTPS with SigV4 request signing.

pub mod client;
pub mod models;
pub mod signing;

pub use client::{CostExplorerClient, CostExplorerConfig, DEFAULT_REGION};
pub use signing::{Credentials, Signer};
