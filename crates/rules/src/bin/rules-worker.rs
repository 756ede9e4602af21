//! rules-worker — subscribes to the broker and dispatches rule actions.
//!
//! # Usage
//!
//! ```bash
//! rules-worker --rules-file rules.yaml \
//!     --broker-host 127.0.0.1 --broker-frontend-port 5555 --broker-backend-port 5556
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{Mutex, Notify};

use ponder_messaging::reconnect::{with_backoff, BackoffPolicy};
use ponder_messaging::worker::{Worker, WorkerBuilder, WorkerRunner};
use ponder_messaging::{MessagingError, Transport, ZmqPublisher, ZmqSubscriber};
use ponder_rules::{load_rules, ConfigProtocol, MemoryConfigStore, RulesEngine};

/// Topic-pattern rules engine worker.
#[derive(Parser, Debug)]
#[command(name = "rules-worker", version, about)]
struct Cli {
    /// Path to the YAML rules file.
    #[arg(long, env = "PONDER_RULES_FILE", default_value = "rules.yaml")]
    rules_file: PathBuf,

    /// Broker host.
    #[arg(long, env = "PONDER_BROKER_HOST", default_value = "127.0.0.1")]
    broker_host: String,

    /// Broker frontend port (publish side).
    #[arg(long, env = "PONDER_BROKER_FRONTEND_PORT", default_value_t = 5555)]
    broker_frontend_port: u16,

    /// Broker backend port (subscribe side).
    #[arg(long, env = "PONDER_BROKER_BACKEND_PORT", default_value_t = 5556)]
    broker_backend_port: u16,
}

/// Worker wrapper: owns the engine loop task.
struct EngineWorker {
    engine: Arc<RulesEngine>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait::async_trait]
impl Worker for EngineWorker {
    async fn start(&self) -> Result<(), MessagingError> {
        let engine = self.engine.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = engine.run(shutdown).await {
                tracing::error!(error = %e, "rules engine exited with error");
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
        "rules-worker"
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
    let rules = load_rules(&cli.rules_file)?;
    tracing::info!(
        rules = rules.len(),
        file = %cli.rules_file.display(),
        "starting rules-worker"
    );

    let frontend = Transport::tcp(cli.broker_host.clone(), cli.broker_frontend_port);
    let backend = Transport::tcp(cli.broker_host.clone(), cli.broker_backend_port);
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

    let protocol = Arc::new(ConfigProtocol::new(
        Arc::new(MemoryConfigStore::new()),
        publisher.clone(),
    ));
    let engine = Arc::new(RulesEngine::new(
        rules,
        subscriber,
        publisher.clone(),
        protocol,
    ));

    let worker = Arc::new(EngineWorker {
        engine,
        shutdown: Arc::new(Notify::new()),
        handle: Mutex::new(None),
    });

    let config = WorkerBuilder::new("rules-worker").build();
    WorkerRunner::run(worker, publisher, config, None).await?;

    Ok(())
}
