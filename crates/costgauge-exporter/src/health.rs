//! Per-window health, shared between window tasks and the supervisor

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// Outcome history of one window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowHealth {
    pub window: String,
    /// Completed cycles, successful or not
    pub cycles: u64,
    pub consecutive_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Whether the scrape endpoint is bound and serving
    pub endpoint_up: bool,
}

impl WindowHealth {
    /// At least one successful cycle and the latest one succeeded
    pub fn is_healthy(&self) -> bool {
        self.last_success.is_some() && self.consecutive_failures == 0
    }
}

/// Concurrent map of window id to health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    windows: Arc<DashMap<String, WindowHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, window: &str) {
        self.windows
            .entry(window.to_string())
            .or_insert_with(|| WindowHealth {
                window: window.to_string(),
                ..Default::default()
            });
    }

    pub fn record_success(&self, window: &str, at: DateTime<Utc>) {
        self.update(window, |health| {
            health.cycles += 1;
            health.consecutive_failures = 0;
            health.last_success = Some(at);
        });
    }

    pub fn record_failure(&self, window: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(window, |health| {
            health.cycles += 1;
            health.consecutive_failures += 1;
            health.last_error = Some(error);
        });
    }

    pub fn set_endpoint_up(&self, window: &str, up: bool) {
        self.update(window, |health| health.endpoint_up = up);
    }

    pub fn get(&self, window: &str) -> Option<WindowHealth> {
        self.windows.get(window).map(|h| h.clone())
    }

    /// All windows, ordered by id
    pub fn snapshot(&self) -> Vec<WindowHealth> {
        let mut all: Vec<_> = self.windows.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.window.cmp(&b.window));
        all
    }

    fn update(&self, window: &str, f: impl FnOnce(&mut WindowHealth)) {
        let mut entry = self
            .windows
            .entry(window.to_string())
            .or_insert_with(|| WindowHealth {
                window: window.to_string(),
                ..Default::default()
            });
        f(entry.value_mut());
    }
}
