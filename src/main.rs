//! GeoBeep - proximity alarm daemon
//!
//! Watches a stream of position fixes and raises an alert when the device
//! comes within a configured radius of a fixed target point.
//!
//! Module structure:
//! - `domain/` - Core types (Target, LocationSample, AlarmState) and geo math
//! - `io/` - External interfaces (location sources, notifiers, HTTP control)
//! - `services/` - Proximity evaluator, dispatcher, monitor lifecycle
//! - `infra/` - Infrastructure (Config, Metrics, intent store)

use anyhow::Context;
use clap::Parser;
use geobeep::infra::{Config, Metrics, RuntimeFileIntentStore};
use geobeep::io::{build_notifier, build_source};
use geobeep::services::{AlarmDispatcher, MonitorLifecycle, MonitorSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// GeoBeep - alarm when you get close to your stop
#[derive(Parser, Debug)]
#[command(name = "geobeep", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-sample visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "geobeep starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config);
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        target = %config.target(),
        radius_m = %config.radius().meters(),
        source = %config.location_source().as_str(),
        interval_ms = %config.location_request().interval.as_millis(),
        fastest_interval_ms = %config.location_request().fastest_interval.as_millis(),
        accuracy = %config.location_request().accuracy.as_str(),
        notifier = %config.notifier_kind().as_str(),
        restart = ?config.restart_policy(),
        control_port = %config.control_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let source = build_source(&config, metrics.clone());
    let notifier = build_notifier(&config);
    let dispatcher = Arc::new(AlarmDispatcher::new(
        notifier,
        metrics.clone(),
        config.alarm_title(),
        config.alarm_body(),
    ));
    let intent = Arc::new(RuntimeFileIntentStore::new(config.intent_file()));
    let monitor = Arc::new(MonitorLifecycle::new(
        MonitorSettings::from_config(&config),
        source,
        dispatcher,
        intent,
        metrics.clone(),
    ));

    // Pick up where a crashed or respawned process left off
    monitor.resume(config.autostart()).await;

    // Start supervisor (sticky restart of a dead monitoring loop)
    let supervisor = monitor.clone();
    let supervise_every = Duration::from_millis(config.supervise_interval_ms());
    let supervisor_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        supervisor.supervise(supervise_every, supervisor_shutdown).await;
    });

    // Start control/metrics HTTP server (if port > 0)
    let control_port = config.control_port();
    if control_port > 0 {
        let addr: SocketAddr = format!("{}:{}", config.control_bind_address(), control_port)
            .parse()
            .with_context(|| {
                format!("invalid control bind address {}", config.control_bind_address())
            })?;
        let http_monitor = monitor.clone();
        let http_metrics = metrics.clone();
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = geobeep::io::http::start_control_server(
                addr,
                http_monitor,
                http_metrics,
                http_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "control server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Run until Ctrl+C
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Release the device but keep the recorded intent, so a respawn resumes
    monitor.shutdown().await;

    info!("geobeep shutdown complete");
    Ok(())
}
