//! Per-window Prometheus gauges
//!
//! Each window owns one `WindowPublisher` with a private registry, so no gauge
//! state is shared across windows. A whole cycle is applied under a write lock
//! and scrapes render under a read lock: a reader sees either the previous
//! cycle or the new one, never a mix.

use chrono::{DateTime, Utc};
use costgauge_billing::WindowAggregate;
use costgauge_common::{Error, KeyMode, Result, WindowDefinition};
use parking_lot::RwLock;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, Opts, Registry, TextEncoder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// Default metric namespace
pub const DEFAULT_NAMESPACE: &str = "aws";

/// Gauges and health metrics for one window
pub struct WindowPublisher {
    window_id: String,
    key_mode: KeyMode,
    expire_stale: bool,
    registry: Registry,
    costs: GaugeVec,
    last_success: Gauge,
    failures: IntCounter,
    /// Write-held for a whole publish, read-held while rendering
    cycle: RwLock<()>,
}

impl WindowPublisher {
    /// Create a publisher and register its metrics in a fresh registry
    pub fn new(window: &WindowDefinition, namespace: &str) -> Result<Self> {
        let (name, help, labels) = Self::family(window.key_mode);

        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(namespace)
                .const_label("window", window.id.as_str())
        };

        let costs = GaugeVec::new(opts(name, help), labels).map_err(publish_error)?;
        let last_success = Gauge::with_opts(opts(
            "export_last_success_timestamp_seconds",
            "Unix time of the last successful export cycle",
        ))
        .map_err(publish_error)?;
        let failures = IntCounter::with_opts(opts(
            "export_failures_total",
            "Export cycles that failed and left previous values in place",
        ))
        .map_err(publish_error)?;

        let registry = Registry::new();
        registry
            .register(Box::new(costs.clone()))
            .map_err(publish_error)?;
        registry
            .register(Box::new(last_success.clone()))
            .map_err(publish_error)?;
        registry
            .register(Box::new(failures.clone()))
            .map_err(publish_error)?;

        Ok(Self {
            window_id: window.id.clone(),
            key_mode: window.key_mode,
            expire_stale: window.expire_stale,
            registry,
            costs,
            last_success,
            failures,
            cycle: RwLock::new(()),
        })
    }

    /// Metric name, help and label names for a key mode
    fn family(mode: KeyMode) -> (&'static str, &'static str, &'static [&'static str]) {
        match mode {
            KeyMode::Total => (
                "cost_total",
                "Cost per group key summed over the window range",
                &["group_key"],
            ),
            KeyMode::ByDate => (
                "cost_by_date",
                "Cost per group key for each date in the window range",
                &["date", "group_key"],
            ),
            KeyMode::ByPeriod => (
                "cost_by_period",
                "Total cost for each period in the window range",
                &["period"],
            ),
        }
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    /// Set one label-set to `value`
    pub fn set(&self, labels: &HashMap<&str, &str>, value: Decimal) -> Result<()> {
        let value = to_f64(value)?;
        let _guard = self.cycle.write();
        self.costs
            .get_metric_with(labels)
            .map_err(publish_error)?
            .set(value);
        Ok(())
    }

    /// Apply a whole cycle's aggregate and stamp the success time.
    ///
    /// Returns the number of label-sets written.
    pub fn publish(&self, aggregate: &WindowAggregate, at: DateTime<Utc>) -> Result<usize> {
        if aggregate.key_mode() != self.key_mode {
            return Err(Error::Publish(format!(
                "window {} exports {:?} but got a {:?} aggregate",
                self.window_id,
                self.key_mode,
                aggregate.key_mode()
            )));
        }

        // Convert everything first so a bad value leaves the gauges untouched
        let samples = samples(aggregate)?;

        let _guard = self.cycle.write();
        if self.expire_stale {
            self.costs.reset();
        }
        for (labels, value) in &samples {
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            self.costs
                .get_metric_with_label_values(&labels)
                .map_err(publish_error)?
                .set(*value);
        }
        self.last_success.set(at.timestamp() as f64);

        debug!(window = %self.window_id, samples = samples.len(), "Published gauges");
        Ok(samples.len())
    }

    pub fn record_failure(&self) {
        self.failures.inc();
    }

    pub fn failures(&self) -> u64 {
        self.failures.get()
    }

    /// Current value for a label-set, if it has been set
    pub fn value(&self, label_values: &[&str]) -> Option<f64> {
        let _guard = self.cycle.read();
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name().ends_with(Self::family(self.key_mode).0))
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                let values: Vec<&str> = metric
                    .get_label()
                    .iter()
                    .filter(|pair| pair.get_name() != "window")
                    .map(|pair| pair.get_value())
                    .collect();
                values == label_values
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let families = {
            let _guard = self.cycle.read();
            self.registry.gather()
        };
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(publish_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Publish(e.to_string()))
    }
}

fn publish_error(err: prometheus::Error) -> Error {
    Error::Publish(err.to_string())
}

fn to_f64(value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| Error::Publish(format!("{} does not fit a gauge", value)))
}

/// Label values (in family label order) and gauge value for each key
fn samples(aggregate: &WindowAggregate) -> Result<Vec<(Vec<String>, f64)>> {
    match aggregate {
        WindowAggregate::Total(m) => m
            .iter()
            .map(|(key, amount)| Ok((vec![key.clone()], to_f64(*amount)?)))
            .collect(),
        WindowAggregate::ByDate(m) => m
            .iter()
            .map(|((date, key), amount)| Ok((vec![date.to_string(), key.clone()], to_f64(*amount)?)))
            .collect(),
        WindowAggregate::ByPeriod(m) => m
            .iter()
            .map(|(period, amount)| Ok((vec![period.to_string()], to_f64(*amount)?)))
            .collect(),
    }
}
