//! Session Guard
//!
//! Risk-scored session lifecycle and timeout engine:
//! - Session registry with per-session compare-and-swap transitions
//! - Per-role/per-device timeout policies with renewal, warning, and grace
//! - Heuristic risk scoring and anomaly detection
//! - Background monitor with bounded audit and alert delivery

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};

use api::SessionApi;
use guard_core::{PolicyTable, RiskConfig, RiskScorer, SystemClock, TimeoutPolicyResolver};
use registry::SessionRegistry;
use telemetry::init_tracing_from_env;
use worker::{
    AlertConfig, AnomalyConfig, AnomalyDetector, LogAuditSink, MonitorConfig,
    NotificationDispatcher, Reporter, TimeoutMonitor,
};

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    monitor: MonitorConfig,

    #[serde(default)]
    anomaly: AnomalyConfig,

    #[serde(default)]
    risk: RiskConfig,

    /// Timeout policies; the default policy is mandatory
    #[serde(default)]
    policies: PolicyTable,

    #[serde(default)]
    alerts: AlertConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Session Guard v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    info!(
        tick_interval_secs = config.monitor.tick_interval_secs,
        policies = config.policies.policies.len(),
        default_timeout_secs = config.policies.default.timeout_secs,
        webhook = config.alerts.webhook_url.is_some(),
        "Loaded configuration"
    );

    let resolver = Arc::new(
        TimeoutPolicyResolver::new(config.policies.clone()).context("Invalid timeout policies")?,
    );
    let registry = Arc::new(SessionRegistry::new(Arc::new(SystemClock)));
    let scorer = Arc::new(RiskScorer::new(config.risk.clone()));

    let dispatcher = NotificationDispatcher::from_config(&config.alerts)
        .context("Failed to create alert dispatcher")?;
    let reporter = Reporter::new(
        Arc::new(LogAuditSink),
        Arc::new(dispatcher),
        &config.monitor.delivery(),
    );

    let api = SessionApi::new(
        registry.clone(),
        resolver.clone(),
        scorer.clone(),
        reporter.clone(),
    );

    let monitor = Arc::new(TimeoutMonitor::new(
        registry,
        resolver,
        scorer,
        AnomalyDetector::new(config.anomaly.clone()),
        reporter,
        config.monitor.clone(),
    ));
    let monitor_handle = monitor.start();

    shutdown_signal().await;

    info!("Shutting down...");

    // Let the in-flight tick finish
    if let Err(e) = monitor_handle.stop().await {
        error!("Monitor did not stop cleanly: {}", e);
    }

    let status = api.status();
    info!(
        health = ?status.health.status,
        tracked_sessions = status.tracked_sessions,
        sessions_created = status.metrics.sessions_created,
        sessions_expired = status.metrics.sessions_expired,
        anomalies_raised = status.metrics.anomalies_raised,
        "Shutdown complete"
    );
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("SESSION_GUARD")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // The config crate's nested parsing doesn't work reliably with underscored field names
    if let Ok(url) = std::env::var("SESSION_GUARD_ALERTS_WEBHOOK_URL") {
        config.alerts.webhook_url = Some(url);
    }
    if let Ok(secs) = std::env::var("SESSION_GUARD_MONITOR_TICK_INTERVAL_SECS") {
        config.monitor.tick_interval_secs = secs
            .parse()
            .context("SESSION_GUARD_MONITOR_TICK_INTERVAL_SECS must be an integer")?;
    }

    config
        .policies
        .validate()
        .context("Invalid timeout policy table")?;
    config
        .risk
        .validate()
        .context("Invalid risk configuration")?;

    Ok(config)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
