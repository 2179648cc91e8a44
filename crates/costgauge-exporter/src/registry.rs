//! Window registry
//!
//! The built-in windows reproduce the exporters this service replaces. Config
//! entries override a built-in window field by field, add new windows, or
//! switch a window off.

use chrono::NaiveDate;
use costgauge_common::{Error, Granularity, KeyMode, Result, WindowDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Built-in windows, ordered by id
pub fn default_windows() -> Vec<WindowDefinition> {
    // Date-keyed windows slide, so dates leaving the range are expired
    let mut windows: Vec<_> = [
        ("today", 1, 3004),
        ("weekly", 7, 3001),
        ("fortnight", 14, 3003),
        ("monthly", 30, 3002),
    ]
    .into_iter()
    .map(|(id, lookback, port)| {
        WindowDefinition::new(id, lookback, Granularity::Daily, 900, port).with_expire_stale(true)
    })
    .collect();
    if let Some(since) = NaiveDate::from_ymd_opt(2024, 5, 5) {
        windows.push(
            WindowDefinition::new("all-time", 0, Granularity::Monthly, 900, 5002)
                .with_key_mode(KeyMode::Total)
                .with_since(since),
        );
    }
    if let Some(since) = NaiveDate::from_ymd_opt(2023, 1, 1) {
        windows.push(
            WindowDefinition::new("monthly-history", 0, Granularity::Monthly, 3600, 8000)
                .with_key_mode(KeyMode::ByPeriod)
                .with_since(since),
        );
    }
    windows.sort_by(|a, b| a.id.cmp(&b.id));
    windows
}

/// Partial window definition as it appears in config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub enabled: Option<bool>,
    pub lookback_days: Option<u32>,
    pub granularity: Option<Granularity>,
    pub interval_seconds: Option<u64>,
    pub endpoint_port: Option<u16>,
    pub key_mode: Option<KeyMode>,
    pub since: Option<NaiveDate>,
    pub expire_stale: Option<bool>,
}

impl WindowSettings {
    /// Overlay these settings on `base`, or build a new window from scratch
    fn apply(&self, id: &str, base: Option<WindowDefinition>) -> Result<WindowDefinition> {
        let mut window = match base {
            Some(window) => window,
            None => {
                let port = self.endpoint_port.ok_or_else(|| {
                    Error::Config(format!("window {}: endpoint_port is required", id))
                })?;
                WindowDefinition::new(
                    id,
                    self.lookback_days.unwrap_or(7),
                    Granularity::default(),
                    costgauge_common::DEFAULT_INTERVAL_SECS,
                    port,
                )
            }
        };

        if let Some(v) = self.lookback_days {
            window.lookback_days = v;
        }
        if let Some(v) = self.granularity {
            window.granularity = v;
        }
        if let Some(v) = self.interval_seconds {
            window.interval_seconds = v;
        }
        if let Some(v) = self.endpoint_port {
            window.endpoint_port = v;
        }
        if let Some(v) = self.key_mode {
            window.key_mode = v;
        }
        if self.since.is_some() {
            window.since = self.since;
        }
        if let Some(v) = self.expire_stale {
            window.expire_stale = v;
        }
        Ok(window)
    }
}

/// Resolve the windows to run from the built-ins and config overrides.
///
/// Fails on invalid windows, shared ports, or an empty result.
pub fn resolve(
    include_defaults: bool,
    settings: &BTreeMap<String, WindowSettings>,
) -> Result<Vec<WindowDefinition>> {
    let mut windows: BTreeMap<String, WindowDefinition> = if include_defaults {
        default_windows()
            .into_iter()
            .map(|w| (w.id.clone(), w))
            .collect()
    } else {
        BTreeMap::new()
    };

    for (id, entry) in settings {
        let base = windows.remove(id);
        if entry.enabled == Some(false) {
            continue;
        }
        windows.insert(id.clone(), entry.apply(id, base)?);
    }

    if windows.is_empty() {
        return Err(Error::Config("no export windows configured".into()));
    }

    let mut ports: HashMap<u16, &str> = HashMap::new();
    for window in windows.values() {
        window.validate()?;
        if let Some(other) = ports.insert(window.endpoint_port, &window.id) {
            return Err(Error::Config(format!(
                "windows {} and {} both use port {}",
                other, window.id, window.endpoint_port
            )));
        }
    }

    Ok(windows.into_values().collect())
}
