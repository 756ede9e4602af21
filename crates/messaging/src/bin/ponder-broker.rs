//! ponder-broker — Central PUB/SUB event broker for the gateway fleet.
//!
//! Proxies messages from publishers (SUB frontend) to subscribers
//! (PUB backend) while counting per-topic traffic. Provides a REP health
//! check socket.
//!
//! # Usage
//!
//! ```bash
//! # Local IPC (default)
//! ponder-broker
//!
//! # TCP with custom ports
//! ponder-broker --transport tcp --host 0.0.0.0 --frontend-port 5555 --backend-port 5556 --health-port 5557
//!
//! # Via environment variables
//! PONDER_TRANSPORT=tcp PONDER_HOST=0.0.0.0 ponder-broker
//! ```

use std::sync::Arc;

use clap::Parser;
use ponder_messaging::broker::{BrokerConfig, EventBroker};
use ponder_messaging::transport::Transport;

/// Central PUB/SUB event broker for the ponder fleet.
#[derive(Parser, Debug)]
#[command(name = "ponder-broker", version, about)]
struct Cli {
    /// Transport type: "ipc" or "tcp".
    #[arg(long, env = "PONDER_TRANSPORT", default_value = "ipc")]
    transport: String,

    /// TCP host to bind to (only used with --transport tcp).
    #[arg(long, env = "PONDER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Frontend port — publishers connect here (only used with --transport tcp).
    #[arg(long, env = "PONDER_FRONTEND_PORT", default_value_t = 5555)]
    frontend_port: u16,

    /// Backend port — subscribers connect here (only used with --transport tcp).
    #[arg(long, env = "PONDER_BACKEND_PORT", default_value_t = 5556)]
    backend_port: u16,

    /// Health check port (only used with --transport tcp).
    #[arg(long, env = "PONDER_HEALTH_PORT", default_value_t = 5557)]
    health_port: u16,

    /// IPC socket name prefix (only used with --transport ipc).
    #[arg(long, env = "PONDER_IPC_PREFIX", default_value = "broker")]
    ipc_prefix: String,

    /// Interval in seconds between traffic log lines (0 = disabled).
    #[arg(long, env = "PONDER_METRICS_INTERVAL", default_value_t = 30)]
    metrics_interval: u64,
}

impl Cli {
    fn into_broker_config(self) -> BrokerConfig {
        match self.transport.as_str() {
            "tcp" => BrokerConfig::tcp(
                &self.host,
                self.frontend_port,
                self.backend_port,
                self.health_port,
            ),
            _ => BrokerConfig {
                frontend: Transport::ipc(&format!("{}-frontend", self.ipc_prefix)),
                backend: Transport::ipc(&format!("{}-backend", self.ipc_prefix)),
                health: Transport::ipc(&format!("{}-health", self.ipc_prefix)),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let metrics_interval = cli.metrics_interval;

    tracing::info!(?cli, "starting ponder-broker");

    let config = cli.into_broker_config();
    let broker = Arc::new(EventBroker::new(config));

    let broker_for_signal = broker.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        broker_for_signal.shutdown();
    });

    if metrics_interval > 0 {
        let metrics = broker.metrics().clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
            loop {
                interval.tick().await;
                let total = metrics.total();
                let counts = metrics.topic_counts.lock().await;
                tracing::info!(
                    total_messages = total,
                    unique_topics = counts.len(),
                    "broker traffic"
                );
                for (topic, count) in counts.iter() {
                    tracing::debug!(topic = %topic, count = count, "topic stats");
                }
            }
        });
    }

    broker.run().await?;

    tracing::info!("ponder-broker exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}
