//! Command-line entry point for the condhook rule service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use condhook_core::config::{defaults, env_vars, ServiceConfig};
use condhook_rules::{EvalexprEngine, HttpForwarder};
use condhook_service::ServiceClient;
use tracing::{error, info, warn};

/// condhook - Evaluate device rules and forward the results.
#[derive(Parser, Debug)]
#[command(name = "condhook")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Framework REST server URI.
    #[arg(long, env = env_vars::FRAMEWORK_SERVER, default_value = defaults::FRAMEWORK_SERVER)]
    framework_server: String,

    /// MQTT server URI.
    #[arg(long, env = env_vars::MQTT_SERVER, default_value = defaults::MQTT_SERVER)]
    mqtt_server: String,

    /// Service id.
    #[arg(long, env = env_vars::SERVICE_ID)]
    service_id: String,

    /// Service token.
    #[arg(long, env = env_vars::SERVICE_TOKEN, hide_env_values = true)]
    service_token: String,

    /// Log level: debug=5, info=4, warning=3, error=2, fatal=1, panic=0.
    #[arg(
        long,
        env = env_vars::LOG_LEVEL,
        default_value_t = defaults::LOG_LEVEL,
        value_parser = clap::value_parser!(u8).range(0..=5)
    )]
    log_level: u8,

    /// Timeout in seconds for outbound HTTP POSTs.
    #[arg(long, env = env_vars::HTTP_TIMEOUT_SECS, default_value_t = defaults::HTTP_TIMEOUT_SECS)]
    http_timeout_secs: u64,
}

impl Args {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig::new(&self.service_id, &self.service_token)
            .with_framework_server(&self.framework_server)
            .with_mqtt_server(&self.mqtt_server)
            .with_http_timeout_secs(self.http_timeout_secs)
    }
}

fn level_filter(log_level: u8) -> tracing::Level {
    match log_level {
        5.. => tracing::Level::DEBUG,
        4 => tracing::Level::INFO,
        3 => tracing::Level::WARN,
        _ => tracing::Level::ERROR,
    }
}

fn init_logging(log_level: u8) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    // RUST_LOG wins over --log-level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("").add_directive(level_filter(log_level).into())
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let config = args.service_config();
    info!(
        service_id = %config.service_id,
        "Starting condhook {} (framework {}, mqtt {})",
        env!("CARGO_PKG_VERSION"),
        config.framework_server,
        config.mqtt_server
    );

    let forwarder = HttpForwarder::new(Duration::from_secs(config.http_timeout_secs))
        .context("failed to build HTTP client")?;
    let client = ServiceClient::connect(&config, Arc::new(EvalexprEngine::new()), Arc::new(forwarder))
        .await
        .context("failed to start service")?;

    client.set_status("Starting").await?;
    let linked = client
        .link_existing()
        .await
        .context("failed to fetch linked devices")?;
    client.set_status("Started").await?;
    info!("Service started with {} devices", linked);

    let reason = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            StopReason::Signal
        }
        _ = client.closed() => {
            error!("MQTT connection closed unexpectedly");
            StopReason::ConnectionLost
        }
    };

    client.stop_devices().await;
    if let Err(e) = client.set_status("Shutting down").await {
        warn!("Failed to publish final status: {}", e);
    }
    if let Err(e) = client.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    info!("Shutdown complete");
    reason.into_result()
}

/// Why the service stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Signal,
    ConnectionLost,
}

impl StopReason {
    /// Losing the broker is fatal so a supervisor restarts the service.
    fn into_result(self) -> Result<()> {
        match self {
            StopReason::Signal => Ok(()),
            StopReason::ConnectionLost => anyhow::bail!("MQTT connection lost"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
