//! Exporter configuration
//!
//! Sources, lowest priority first: built-in defaults, a TOML file, then
//! `COSTGAUGE__*` environment variables (`__` separates nested keys, e.g.
//! `COSTGAUGE__WINDOWS__WEEKLY__INTERVAL_SECONDS=300`).

use ::config::{Config, Environment, File, FileFormat};
use costgauge_billing::{CostExplorerConfig, CostMetric};
use costgauge_common::{Error, Result, WindowDefinition, DEFAULT_MAX_PAGES, DEFAULT_TAG_KEY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::publisher::DEFAULT_NAMESPACE;
use crate::registry::{self, WindowSettings};

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "COSTGAUGE";

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_NAME: &str = "costgauge";

/// Exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Address every window endpoint binds to
    pub bind_host: String,
    /// Metric name prefix
    pub namespace: String,
    /// Cost-allocation tag used to group costs
    pub tag_key: String,
    pub metric: CostMetric,
    /// Cost Explorer region
    pub region: String,
    /// Cost Explorer endpoint override
    pub endpoint: Option<String>,
    pub request_timeout_secs: u64,
    /// Page cap per cycle
    pub max_pages: usize,
    /// Time allowed for window tasks to stop on shutdown
    pub shutdown_grace_secs: u64,
    /// Start from the built-in windows
    pub default_windows: bool,
    pub windows: BTreeMap<String, WindowSettings>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            tag_key: DEFAULT_TAG_KEY.to_string(),
            metric: CostMetric::default(),
            region: costgauge_billing::explorer::DEFAULT_REGION.to_string(),
            endpoint: None,
            request_timeout_secs: 30,
            max_pages: DEFAULT_MAX_PAGES,
            shutdown_grace_secs: 5,
            default_windows: true,
            windows: BTreeMap::new(),
        }
    }
}

impl ExporterConfig {
    /// Load `.env`, then layer the config file and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config: Self = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string, without environment overrides
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        if self.namespace.trim().is_empty() {
            return Err(Error::Config("namespace must not be empty".into()));
        }
        if self.tag_key.trim().is_empty() {
            return Err(Error::Config("tag_key must not be empty".into()));
        }
        if self.max_pages == 0 {
            return Err(Error::Config("max_pages must be positive".into()));
        }
        self.resolve_windows().map(|_| ())
    }

    pub fn bind_addr(&self) -> Result<IpAddr> {
        self.bind_host
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind_host {}: {}", self.bind_host, e)))
    }

    /// Windows to run, ordered by id
    pub fn resolve_windows(&self) -> Result<Vec<WindowDefinition>> {
        registry::resolve(self.default_windows, &self.windows)
    }

    pub fn explorer_config(&self) -> CostExplorerConfig {
        CostExplorerConfig {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
