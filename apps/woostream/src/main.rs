//! woostream Binary
//!
//! Streams fills and position updates from the WOO X private stream to the
//! terminal and, when configured, a Telegram chat.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p woostream -- --help
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `WOO_APPLICATION_ID`: Application id
//! - `WOO_API_PUBLIC_KEY`: API public key
//! - `WOO_API_SECRET_KEY`: API secret key
//!
//! ## Optional
//! - `WOO_NETWORK`: mainnet | testnet (default: mainnet)
//! - `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`: Enable the Telegram sink
//! - `WOOSTREAM_METRICS_PORT`: Prometheus metrics port (default: off)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: woostream=info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use woostream::application::services::{Relay, announce_balances, announce_positions};
use woostream::infrastructure::config::{AppConfig, Cli};
use woostream::infrastructure::dispatch::{Dispatcher, RateLimiter};
use woostream::infrastructure::sinks::{ShellSink, TelegramSink, VerifyError};
use woostream::infrastructure::woo::{PositionsClient, StreamClient};
use woostream::infrastructure::{metrics, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    load_dotenv();
    let cli = Cli::parse();

    let _telemetry_guard = telemetry::init();

    let config = match AppConfig::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    log_config(&config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        metrics::init_metrics(addr).context("failed to start Prometheus exporter")?;
    }

    let shutdown_token = CancellationToken::new();

    // Sinks
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        Arc::new(ShellSink::stdout()),
        RateLimiter::unlimited(),
        config.delivery.retry,
    );

    if let Some(settings) = &config.telegram {
        let sink = TelegramSink::new(settings.sink_config())
            .context("failed to build Telegram HTTP client")?;
        match sink.verify().await {
            Ok(()) => {}
            Err(e @ VerifyError::Unauthorized(_)) => {
                tracing::error!(error = %e, "Telegram bot token rejected");
                return Err(e.into());
            }
            Err(e @ VerifyError::Unavailable(_)) => {
                tracing::warn!(error = %e, "Could not verify Telegram bot token, continuing");
            }
        }
        dispatcher.register(
            Arc::new(sink),
            RateLimiter::token_bucket(settings.capacity, settings.refill_per_sec),
            config.delivery.retry,
        );
    }

    // Account snapshot
    if config.position_snapshot {
        match PositionsClient::new(config.rest_url.clone(), config.credentials.clone()) {
            Ok(client) => {
                announce_positions(&client, &dispatcher).await;
                announce_balances(&client, &dispatcher).await;
            }
            Err(e) => tracing::warn!(error = %e, "Account snapshot unavailable"),
        }
    }

    // Stream and relay
    let (raw_tx, raw_rx) = mpsc::channel(config.stream.raw_channel_capacity);
    let stream_client = StreamClient::new(
        config.stream_client_config(),
        raw_tx,
        shutdown_token.clone(),
    );
    let stream_task = tokio::spawn(async move {
        if let Err(e) = stream_client.run().await {
            tracing::error!(error = %e, "Stream client stopped");
        }
    });

    let relay_task = tokio::spawn(Relay::new(raw_rx, dispatcher, shutdown_token.clone()).run());

    tracing::info!("woostream ready");

    await_shutdown(shutdown_token).await;

    if let Err(e) = stream_task.await {
        tracing::error!(error = %e, "Stream task failed");
    }
    let dispatcher = relay_task.await.context("relay task failed")?;

    tracing::info!(
        grace_secs = config.delivery.shutdown_grace.as_secs(),
        "Draining sink queues"
    );
    let report = dispatcher.shutdown(config.delivery.shutdown_grace).await;

    tracing::info!(
        delivered = report.delivered,
        dropped = report.dropped,
        undelivered = report.undelivered,
        "woostream stopped"
    );
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        network = %config.network,
        application_id = config.credentials.application_id(),
        telegram = config.telegram.is_some(),
        metrics_port = config.metrics_port,
        position_snapshot = config.position_snapshot,
        "Configuration loaded"
    );
    tracing::debug!(
        endpoint = %config.endpoint,
        rest_url = %config.rest_url,
        heartbeat_secs = config.stream.heartbeat_interval.as_secs(),
        missed_heartbeats = config.stream.missed_heartbeats,
        "Exchange endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
