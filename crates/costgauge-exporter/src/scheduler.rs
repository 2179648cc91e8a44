//! Export scheduler
//!
//! One `WindowExporter` per window: compute the range from the clock, collect
//! and aggregate, publish, sleep, repeat. Every cycle error stops at `tick`,
//! which keeps the previous gauge values and lets the loop carry on.

use chrono::{DateTime, NaiveDate, Utc};
use costgauge_billing::CostAggregator;
use costgauge_common::{DateRange, Error, Result, WindowDefinition};
use futures::FutureExt;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::health::HealthRegistry;
use crate::publisher::WindowPublisher;

/// Source of "now" for range computation
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current UTC calendar date
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// What a successful cycle published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub range: DateRange,
    /// Label-sets written
    pub keys: usize,
    pub total: Decimal,
}

/// Result of one tick
#[derive(Debug)]
pub enum CycleOutcome {
    Published(CycleReport),
    Failed(Error),
    Panicked(String),
}

impl CycleOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, CycleOutcome::Published(_))
    }
}

/// Periodic export loop for one window
pub struct WindowExporter {
    window: WindowDefinition,
    aggregator: CostAggregator,
    publisher: Arc<WindowPublisher>,
    clock: Arc<dyn Clock>,
    health: HealthRegistry,
}

impl WindowExporter {
    pub fn new(
        window: WindowDefinition,
        aggregator: CostAggregator,
        publisher: Arc<WindowPublisher>,
        clock: Arc<dyn Clock>,
        health: HealthRegistry,
    ) -> Self {
        health.register(&window.id);
        Self {
            window,
            aggregator,
            publisher,
            clock,
            health,
        }
    }

    pub fn window(&self) -> &WindowDefinition {
        &self.window
    }

    pub fn publisher(&self) -> &Arc<WindowPublisher> {
        &self.publisher
    }

    /// Collect and publish once, returning the first error
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let now = self.clock.now();
        self.cycle_at(now, self.window.range_for(now.date_naive()))
            .await
    }

    #[instrument(skip(self, now), fields(window = %self.window.id, start = %range.start(), end = %range.end()))]
    async fn cycle_at(&self, now: DateTime<Utc>, range: DateRange) -> Result<CycleReport> {
        let aggregate = self
            .aggregator
            .collect(range, self.window.granularity, self.window.key_mode)
            .await?;
        let keys = self.publisher.publish(&aggregate, now)?;
        Ok(CycleReport {
            range,
            keys,
            total: aggregate.total(),
        })
    }

    /// Run one cycle, containing any error or panic
    pub async fn tick(&self) -> CycleOutcome {
        let started = Instant::now();
        let now = self.clock.now();
        let range = self.window.range_for(now.date_naive());
        let id = self.window.id.as_str();

        match AssertUnwindSafe(self.cycle_at(now, range))
            .catch_unwind()
            .await
        {
            Ok(Ok(report)) => {
                self.health.record_success(id, now);
                info!(
                    window = id,
                    start = %range.start(),
                    end = %range.end(),
                    keys = report.keys,
                    total = %report.total,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Export cycle published"
                );
                CycleOutcome::Published(report)
            }
            Ok(Err(e)) => {
                self.publisher.record_failure();
                self.health.record_failure(id, e.to_string());
                warn!(
                    window = id,
                    start = %range.start(),
                    end = %range.end(),
                    kind = e.kind(),
                    error = %e,
                    "Export cycle failed, keeping previous values"
                );
                CycleOutcome::Failed(e)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.publisher.record_failure();
                self.health
                    .record_failure(id, format!("panic: {}", message));
                error!(
                    window = id,
                    start = %range.start(),
                    end = %range.end(),
                    panic = %message,
                    "Export cycle panicked, keeping previous values"
                );
                CycleOutcome::Panicked(message)
            }
        }
    }

    /// Tick immediately, then every `interval_seconds` until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.window.interval();
        info!(
            window = %self.window.id,
            interval_secs = interval.as_secs(),
            granularity = %self.window.granularity,
            "Window exporter started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if unless_shutdown(self.tick(), &mut shutdown).await.is_none() {
                break;
            }
            if unless_shutdown(tokio::time::sleep(interval), &mut shutdown)
                .await
                .is_none()
            {
                break;
            }
        }

        info!(window = %self.window.id, "Window exporter stopped");
    }
}

/// Drive `fut` to completion unless shutdown is signalled first.
///
/// A change back to `false` leaves `fut` running.
async fn unless_shutdown<F: Future>(
    fut: F,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return None;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use costgauge_billing::testing::{FnClient, ScriptedClient};
    use costgauge_billing::BillingClient;
    use costgauge_common::{CostRecord, Granularity, KeyMode, Page};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 12, 6, 0, 0).unwrap()))
    }

    fn weekly() -> WindowDefinition {
        WindowDefinition::new("weekly", 7, Granularity::Daily, 900, 3001)
            .with_key_mode(KeyMode::Total)
    }

    fn exporter(client: Arc<dyn BillingClient>, clock: Arc<FixedClock>) -> WindowExporter {
        let window = weekly();
        let publisher = Arc::new(WindowPublisher::new(&window, "aws").unwrap());
        WindowExporter::new(
            window,
            CostAggregator::new(client),
            publisher,
            clock,
            HealthRegistry::new(),
        )
    }

    fn page(key: &str, amount: Decimal) -> Page {
        Page::last(vec![CostRecord::new(date(2024, 5, 12), key, amount).unwrap()])
    }

    #[tokio::test]
    async fn test_cycle_uses_clock_range() {
        let client = Arc::new(FnClient::new(|query, _| {
            assert_eq!(query.range.start(), NaiveDate::from_ymd_opt(2024, 5, 5).unwrap());
            assert_eq!(query.range.end(), NaiveDate::from_ymd_opt(2024, 5, 12).unwrap());
            Ok(Page::last(vec![]))
        }));
        let exporter = exporter(client.clone(), clock());

        let report = exporter.run_cycle().await.unwrap();
        assert_eq!(report.range.days(), 8);
        assert_eq!(report.keys, 0);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_values() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(page("alice", dec!(4.20))),
            Err(Error::Upstream("ThrottlingException: Rate exceeded".into())),
        ]));
        let exporter = exporter(client, clock());

        assert!(exporter.tick().await.is_published());
        let rendered = exporter.publisher().render().unwrap();

        match exporter.tick().await {
            CycleOutcome::Failed(e) => assert!(e.is_upstream()),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(exporter.publisher().value(&["alice"]), Some(4.2));
        assert_eq!(exporter.publisher().failures(), 1);

        // Only the failure counter moved
        let after = exporter.publisher().render().unwrap();
        assert_ne!(rendered, after);
        assert!(after.contains(r#"aws_cost_total{group_key="alice",window="weekly"} 4.2"#));

        let health = exporter.health.get("weekly").unwrap();
        assert_eq!(health.cycles, 2);
        assert_eq!(health.consecutive_failures, 1);
        assert!(health.last_success.is_some());
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let client = Arc::new(FnClient::new(|_, _| panic!("bad payload")));
        let exporter = exporter(client, clock());

        match exporter.tick().await {
            CycleOutcome::Panicked(message) => assert_eq!(message, "bad payload"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(exporter.publisher().failures(), 1);
        let health = exporter.health.get("weekly").unwrap();
        assert_eq!(health.last_error.as_deref(), Some("panic: bad payload"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_immediately_then_each_interval() {
        let client = Arc::new(ScriptedClient::repeating(page("alice", dec!(1))));
        let exporter = Arc::new(exporter(client.clone(), clock()));
        let (tx, rx) = watch::channel(false);

        let task = {
            let exporter = exporter.clone();
            tokio::spawn(async move { exporter.run(rx).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.calls(), 1);

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(client.calls(), 2);

        tokio::time::sleep(Duration::from_secs(1800)).await;
        assert_eq!(client.calls(), 4);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let client = Arc::new(ScriptedClient::repeating(page("alice", dec!(1))));
        let exporter = Arc::new(exporter(client.clone(), clock()));
        let (tx, rx) = watch::channel(false);

        let task = {
            let exporter = exporter.clone();
            tokio::spawn(async move { exporter.run(rx).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.calls(), 1);
    }

    /// Answers after a fixed delay
    struct SlowClient {
        delay: Duration,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BillingClient for SlowClient {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn fetch_page(
            &self,
            _query: &costgauge_billing::CostQuery,
            _token: Option<&str>,
        ) -> Result<Page> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(page("alice", dec!(3)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_signal_does_not_cancel_tick() {
        let client = Arc::new(SlowClient {
            delay: Duration::from_secs(10),
            calls: Default::default(),
        });
        let exporter = Arc::new(exporter(client.clone(), clock()));
        let (tx, rx) = watch::channel(false);

        let task = {
            let exporter = exporter.clone();
            tokio::spawn(async move { exporter.run(rx).await })
        };

        // Mid-fetch
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(false).unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        let health = exporter.health.get("weekly").unwrap();
        assert_eq!(health.cycles, 1);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_success.is_some());
        assert_eq!(exporter.publisher().value(&["alice"]), Some(3.0));
        assert_eq!(client.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Mid-sleep
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(client.calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_clock_advances_range() {
        let client = Arc::new(ScriptedClient::repeating(Page::last(vec![])));
        let clock = clock();
        let exporter = exporter(client, clock.clone());

        let first = exporter.run_cycle().await.unwrap();
        clock.set(Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 1).unwrap());
        let second = exporter.run_cycle().await.unwrap();

        assert_eq!(first.range.end(), date(2024, 5, 12));
        assert_eq!(second.range.end(), date(2024, 5, 13));
        assert_eq!(second.range.start(), date(2024, 5, 6));
    }
}
