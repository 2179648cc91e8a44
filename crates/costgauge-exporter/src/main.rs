//! Costgauge - multi-window billing cost exporter

use clap::Parser;
use costgauge_billing::{BillingClient, CostExplorerClient};
use costgauge_exporter::{CycleOutcome, ExporterConfig, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long, env = "COSTGAUGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, env = "COSTGAUGE_LOG_JSON")]
    json: bool,

    /// Run one cycle per window, print the metrics and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (json, text) = if cli.json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(json)
        .with(text)
        .init();

    tracing::info!(version = costgauge_common::VERSION, "Starting costgauge...");

    let config = ExporterConfig::load(cli.config.as_deref())?;
    let client: Arc<dyn BillingClient> =
        Arc::new(CostExplorerClient::from_env(config.explorer_config())?);
    let clock = Arc::new(SystemClock);

    if cli.once {
        let reports = costgauge_exporter::run_once(&config, client, clock).await?;
        let mut failed = 0;
        for report in reports {
            println!("# window {}", report.window);
            print!("{}", report.rendered);
            if !matches!(report.outcome, CycleOutcome::Published(_)) {
                failed += 1;
            }
        }
        if failed > 0 {
            anyhow::bail!("{} window(s) failed to export", failed);
        }
        return Ok(());
    }

    let supervisor = costgauge_exporter::start(&config, client, clock)?;
    tracing::info!(
        windows = supervisor.windows().count(),
        "Costgauge started successfully"
    );

    let snapshot = supervisor
        .run_until(
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for ctrl-c: {}", e);
                    std::future::pending::<()>().await;
                }
            },
            config.shutdown_grace(),
        )
        .await;

    for health in snapshot {
        tracing::info!(
            window = %health.window,
            cycles = health.cycles,
            consecutive_failures = health.consecutive_failures,
            "Window stopped"
        );
    }
    tracing::info!("Shutting down...");

    Ok(())
}
