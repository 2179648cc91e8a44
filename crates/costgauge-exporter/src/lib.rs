//! # Costgauge Exporter
//!
//! Periodically aggregates billing costs over several lookback windows and
//! serves each window as Prometheus gauges on its own port.
//!
//! ## Per window
//!
//! ```text
//! Clock -> DateRange -> CostAggregator::collect -> WindowPublisher::publish
//!                                                        |
//!                              GET /metrics  <-  render (read lock)
//! ```
//!
//! Windows are independent: an upstream failure in one leaves every other
//! window, and its own previous values, untouched.

pub mod config;
pub mod health;
pub mod publisher;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod supervisor;

pub use crate::config::ExporterConfig;
pub use crate::health::{HealthRegistry, WindowHealth};
pub use crate::publisher::WindowPublisher;
pub use crate::scheduler::{
    Clock, CycleOutcome, CycleReport, FixedClock, SystemClock, WindowExporter,
};
pub use crate::supervisor::Supervisor;

use costgauge_billing::{BillingClient, CostAggregator};
use costgauge_common::Result;
use std::sync::Arc;

/// Aggregator configured from `config` on top of a shared client
pub fn aggregator(config: &ExporterConfig, client: Arc<dyn BillingClient>) -> CostAggregator {
    CostAggregator::new(client)
        .with_tag_key(config.tag_key.clone())
        .with_metric(config.metric)
        .with_max_pages(config.max_pages)
}

/// Start every configured window under a new supervisor.
///
/// Must be called from within a Tokio runtime.
pub fn start(
    config: &ExporterConfig,
    client: Arc<dyn BillingClient>,
    clock: Arc<dyn Clock>,
) -> Result<Supervisor> {
    let mut supervisor = Supervisor::new(config.bind_addr()?);
    let aggregator = aggregator(config, client);
    for window in config.resolve_windows()? {
        supervisor.spawn_window(window, aggregator.clone(), &config.namespace, clock.clone())?;
    }
    Ok(supervisor)
}

/// Outcome of a single cycle for one window, with the text it would serve
#[derive(Debug)]
pub struct OnceReport {
    pub window: String,
    pub outcome: CycleOutcome,
    pub rendered: String,
}

/// Run one cycle per window without binding any endpoint
pub async fn run_once(
    config: &ExporterConfig,
    client: Arc<dyn BillingClient>,
    clock: Arc<dyn Clock>,
) -> Result<Vec<OnceReport>> {
    let aggregator = aggregator(config, client);
    let health = HealthRegistry::new();
    let mut reports = Vec::new();

    for window in config.resolve_windows()? {
        let publisher = Arc::new(WindowPublisher::new(&window, &config.namespace)?);
        let exporter = WindowExporter::new(
            window,
            aggregator.clone(),
            publisher.clone(),
            clock.clone(),
            health.clone(),
        );
        let outcome = exporter.tick().await;
        reports.push(OnceReport {
            window: exporter.window().id.clone(),
            outcome,
            rendered: publisher.render()?,
        });
    }

    Ok(reports)
}
