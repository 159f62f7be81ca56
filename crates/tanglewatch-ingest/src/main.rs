//! Tanglewatch ingestion daemon.
//!
//! Connects to the configured feed endpoints, deduplicates overlapping
//! event notifications across them, and exposes per-endpoint per-category
//! counters as Prometheus metrics.
//!
//! # Usage
//!
//! ```bash
//! # Watch two redundant node feeds
//! tanglewatch-ingest --endpoints node-a.example.com:5556,node-b.example.com:5556
//!
//! # Custom dedup horizon
//! tanglewatch-ingest \
//!     --endpoints node-a.example.com:5556 \
//!     --window-secs 60 \
//!     --retention-secs 180
//! ```
//!
//! Endpoint URIs and the dedup window are validated before any worker is
//! launched; after startup the daemon never exits on a feed failure —
//! failing endpoints are retried on every scan tick until shutdown.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics::gauge;
use tanglewatch_core::metrics::{init_metrics, start_metrics_server};
use tanglewatch_core::Category;
use tanglewatch_ingest::{
    DedupCache, DedupConfig, MetricsSink, Supervisor, SupervisorConfig, TcpTransport,
};
use tracing_subscriber::EnvFilter;

/// Tanglewatch ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "tanglewatch-ingest")]
#[command(about = "Ledger feed ingestion and deduplication daemon")]
#[command(version)]
struct Args {
    /// Feed endpoints as host:port (comma-separated)
    #[arg(long, value_delimiter = ',', required = true)]
    endpoints: Vec<String>,

    /// Dedup window: maximum age of a chain's head segment (seconds)
    #[arg(long, default_value = "60")]
    window_secs: u64,

    /// Dedup retention: idle age after which segments are purged (seconds)
    #[arg(long, default_value = "180")]
    retention_secs: u64,

    /// Supervisor scan tick (seconds)
    #[arg(long, default_value = "5")]
    scan_interval_secs: u64,

    /// Dedup purge tick (seconds)
    #[arg(long, default_value = "30")]
    purge_interval_secs: u64,

    /// Per-endpoint counter report interval (seconds)
    #[arg(long, default_value = "60")]
    report_interval_secs: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("tanglewatch_ingest=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Tanglewatch ingestion daemon starting...");

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
        gauge!("feed_running").set(1.0);
    }

    // Dedup horizon is validated here, before any worker launches
    let cache = Arc::new(
        DedupCache::new(DedupConfig {
            window: Duration::from_secs(args.window_secs),
            retention: Duration::from_secs(args.retention_secs),
        })
        .context("Invalid dedup configuration")?,
    );

    let supervisor = Supervisor::new(
        SupervisorConfig {
            scan_interval: Duration::from_secs(args.scan_interval_secs),
            purge_interval: Duration::from_secs(args.purge_interval_secs),
            report_interval: Duration::from_secs(args.report_interval_secs),
        },
        Arc::new(TcpTransport::new()),
        Arc::clone(&cache),
        Arc::new(MetricsSink),
    );

    // Endpoint URIs are validated as they are registered; a bad one is
    // fatal now and never mid-stream
    for uri in &args.endpoints {
        supervisor
            .add_endpoint(uri)
            .with_context(|| format!("Invalid endpoint '{}'", uri))?;
    }

    tracing::info!("Configuration:");
    tracing::info!("  Endpoints: {}", args.endpoints.len());
    tracing::info!(
        "  Dedup window/retention: {}s/{}s",
        args.window_secs,
        args.retention_secs
    );
    tracing::info!("  Scan tick: {}s", args.scan_interval_secs);
    tracing::info!(
        "  Metrics: {}",
        if args.metrics_port > 0 {
            format!("port {}", args.metrics_port)
        } else {
            "disabled".to_string()
        }
    );

    let running = supervisor.run_flag();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping...");
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    supervisor.run().await;

    gauge!("feed_running").set(0.0);

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    for category in Category::all() {
        let stats = cache.stats(category);
        tracing::info!(
            "Dedup chain {}: {} segments, {} identifiers",
            category,
            stats.segments,
            stats.identifiers
        );
    }

    Ok(())
}
