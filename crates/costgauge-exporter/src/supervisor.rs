//! Supervised window tasks
//!
//! Each window runs two tasks: its export loop and its scrape endpoint. They
//! share nothing with other windows except the billing client and the health
//! registry, so one window failing never stalls another.

use costgauge_billing::CostAggregator;
use costgauge_common::{Result, WindowDefinition};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::health::{HealthRegistry, WindowHealth};
use crate::publisher::WindowPublisher;
use crate::scheduler::{Clock, WindowExporter};
use crate::server;

/// Owns every window task and the shutdown signal they watch
pub struct Supervisor {
    tasks: JoinSet<()>,
    shutdown: watch::Sender<bool>,
    health: HealthRegistry,
    publishers: BTreeMap<String, Arc<WindowPublisher>>,
    bind_host: IpAddr,
}

impl Supervisor {
    pub fn new(bind_host: IpAddr) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            shutdown,
            health: HealthRegistry::new(),
            publishers: BTreeMap::new(),
            bind_host,
        }
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn publisher(&self, window: &str) -> Option<&Arc<WindowPublisher>> {
        self.publishers.get(window)
    }

    /// Windows currently supervised, ordered by id
    pub fn windows(&self) -> impl Iterator<Item = &str> {
        self.publishers.keys().map(String::as_str)
    }

    /// Start the export loop and scrape endpoint for one window
    pub fn spawn_window(
        &mut self,
        window: WindowDefinition,
        aggregator: CostAggregator,
        namespace: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<WindowPublisher>> {
        window.validate()?;
        let publisher = Arc::new(WindowPublisher::new(&window, namespace)?);
        let addr = SocketAddr::new(self.bind_host, window.endpoint_port);
        let id = window.id.clone();

        let exporter = WindowExporter::new(
            window,
            aggregator,
            publisher.clone(),
            clock,
            self.health.clone(),
        );
        let rx = self.shutdown.subscribe();
        self.tasks.spawn(async move { exporter.run(rx).await });

        let rx = self.shutdown.subscribe();
        let health = self.health.clone();
        let scrape = publisher.clone();
        self.tasks.spawn(async move {
            let listener = match server::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    // Export loop keeps running without an endpoint
                    error!(window = %scrape.window_id(), error = %e, "Metrics endpoint unavailable");
                    return;
                }
            };
            health.set_endpoint_up(scrape.window_id(), true);
            if let Err(e) = server::serve_listener(scrape.clone(), listener, rx).await {
                error!(window = %scrape.window_id(), error = %e, "Metrics endpoint failed");
            }
            health.set_endpoint_up(scrape.window_id(), false);
        });

        info!(window = %id, addr = %addr, "Window supervised");
        self.publishers.insert(id, publisher.clone());
        Ok(publisher)
    }

    /// Run until `signal` resolves, then shut down within `grace`
    pub async fn run_until<F>(mut self, signal: F, grace: Duration) -> Vec<WindowHealth>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                joined = self.tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) if e.is_panic() => error!("Window task panicked: {}", e),
                    Some(Err(e)) => warn!("Window task ended: {}", e),
                    None => {
                        warn!("No window tasks left running");
                        break;
                    }
                },
            }
        }
        self.shutdown(grace).await
    }

    /// Signal every task to stop, wait up to `grace`, then abort stragglers
    pub async fn shutdown(mut self, grace: Duration) -> Vec<WindowHealth> {
        info!(windows = self.publishers.len(), "Shutting down windows");
        let _ = self.shutdown.send(true);

        let drained = tokio::time::timeout(grace, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "Grace period elapsed, aborting window tasks");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        self.health.snapshot()
    }
}
