//! agent-worker — simulated gateway edge process.
//!
//! # Usage
//!
//! ```bash
//! agent-worker --gateway-id scale-7 --cert-path /etc/ponder/client.crt \
//!     --broker-host 127.0.0.1
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{Mutex, Notify};

use ponder_agent::{AgentConfig, CertificateMonitor, GatewayAgent};
use ponder_messaging::reconnect::{with_backoff, BackoffPolicy};
use ponder_messaging::worker::{Worker, WorkerBuilder, WorkerRunner};
use ponder_messaging::{MessagingError, Transport, ZmqPublisher, ZmqSubscriber};

/// Gateway agent worker.
#[derive(Parser, Debug)]
#[command(name = "agent-worker", version, about)]
struct Cli {
    /// Identity of this gateway.
    #[arg(long, env = "PONDER_GATEWAY_ID")]
    gateway_id: String,

    /// Optional TOML settings file; flags and env override it.
    #[arg(long, env = "PONDER_AGENT_CONFIG")]
    config_file: Option<PathBuf>,

    /// TLS client certificate path.
    #[arg(long, env = "PONDER_CERT_PATH")]
    cert_path: Option<PathBuf>,

    /// Broker host.
    #[arg(long, env = "PONDER_BROKER_HOST", default_value = "127.0.0.1")]
    broker_host: String,

    /// Broker frontend port (publish side).
    #[arg(long, env = "PONDER_BROKER_FRONTEND_PORT", default_value_t = 5555)]
    broker_frontend_port: u16,

    /// Broker backend port (subscribe side).
    #[arg(long, env = "PONDER_BROKER_BACKEND_PORT", default_value_t = 5556)]
    broker_backend_port: u16,

    /// Seconds between heartbeats.
    #[arg(long, env = "PONDER_HEARTBEAT_INTERVAL_SECS")]
    heartbeat_interval_secs: Option<u64>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config_file {
            Some(path) => AgentConfig::load(path)?,
            None => AgentConfig::new(self.gateway_id.clone()),
        };
        config.gateway_id = self.gateway_id;
        config.broker.host = self.broker_host;
        config.broker.frontend_port = self.broker_frontend_port;
        config.broker.backend_port = self.broker_backend_port;
        if let Some(path) = self.cert_path {
            config.cert_path = path;
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            config.heartbeat_interval_secs = secs;
        }
        Ok(config)
    }
}

/// Worker wrapper: owns the agent loop task.
struct AgentWorker {
    agent: Arc<GatewayAgent>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait::async_trait]
impl Worker for AgentWorker {
    async fn start(&self) -> Result<(), MessagingError> {
        let agent = self.agent.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = agent.run(shutdown).await {
                tracing::error!(error = %e, "gateway agent exited with error");
            }
        });
        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), MessagingError> {
        self.shutdown.notify_waiters();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "agent-worker"
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

    let config = Cli::parse().into_config()?;
    tracing::info!(gateway_id = %config.gateway_id, "starting agent-worker");

    let frontend = Transport::tcp(config.broker.host.clone(), config.broker.frontend_port);
    let backend = Transport::tcp(config.broker.host.clone(), config.broker.backend_port);
    let policy = BackoffPolicy::default();

    let publisher = Arc::new(
        with_backoff("broker frontend", &policy, || {
            ZmqPublisher::connect(&frontend)
        })
        .await?,
    );
    let subscriber = Arc::new(
        with_backoff("broker backend", &policy, || {
            ZmqSubscriber::connect(&backend)
        })
        .await?,
    );

    let certificate = CertificateMonitor::start(config.cert_path.clone())?;
    let worker_name = format!("agent-{}", config.gateway_id);
    let agent = Arc::new(GatewayAgent::new(
        config,
        publisher.clone(),
        subscriber,
        certificate,
    ));

    let worker = Arc::new(AgentWorker {
        agent,
        shutdown: Arc::new(Notify::new()),
        handle: Mutex::new(None),
    });

    let config = WorkerBuilder::new(worker_name).build();
    WorkerRunner::run(worker, publisher, config, None).await?;

    Ok(())
}
