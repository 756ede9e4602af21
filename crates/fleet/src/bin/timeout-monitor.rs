//! timeout-monitor — scans the read model and disconnects gateways whose
//! heartbeats have gone silent.
//!
//! # Usage
//!
//! ```bash
//! timeout-monitor --database-url postgres://ponder@localhost/ponder \
//!     --broker-host 127.0.0.1 --broker-frontend-port 5555
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio::sync::{Mutex, Notify};

use ponder_core::config::TimeoutSettings;
use ponder_fleet::monitor::TimeoutMonitor;
use ponder_fleet::projector::Projector;
use ponder_fleet::store::{PgEventStore, PgReadModel};
use ponder_messaging::reconnect::{with_backoff, BackoffPolicy};
use ponder_messaging::worker::{Worker, WorkerBuilder, WorkerRunner};
use ponder_messaging::{MessagingError, Transport, ZmqPublisher};

/// Gateway heartbeat timeout monitor.
#[derive(Parser, Debug)]
#[command(name = "timeout-monitor", version, about)]
struct Cli {
    /// PostgreSQL connection string for the event log and read model.
    #[arg(long, env = "PONDER_DATABASE_URL")]
    database_url: String,

    /// Broker host.
    #[arg(long, env = "PONDER_BROKER_HOST", default_value = "127.0.0.1")]
    broker_host: String,

    /// Broker frontend port (publish side, used for worker health pings).
    #[arg(long, env = "PONDER_BROKER_FRONTEND_PORT", default_value_t = 5555)]
    broker_frontend_port: u16,

    /// Seconds between read-model scans.
    #[arg(long, env = "PONDER_POLL_INTERVAL_SECS", default_value_t = 30)]
    poll_interval_secs: u64,

    /// Seconds of heartbeat silence before a gateway is disconnected.
    #[arg(long, env = "PONDER_HEARTBEAT_TIMEOUT_SECS", default_value_t = 120)]
    heartbeat_timeout_secs: u64,
}

/// Worker wrapper: owns the monitor loop task.
struct MonitorWorker {
    monitor: Arc<TimeoutMonitor>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait::async_trait]
impl Worker for MonitorWorker {
    async fn start(&self) -> Result<(), MessagingError> {
        let monitor = self.monitor.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            monitor.run(shutdown).await;
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
        "timeout-monitor"
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
    tracing::info!(
        poll_interval_secs = cli.poll_interval_secs,
        heartbeat_timeout_secs = cli.heartbeat_timeout_secs,
        "starting timeout-monitor"
    );

    let pool = sqlx::PgPool::connect(&cli.database_url).await?;
    let store = PgEventStore::new(pool.clone());
    store.initialize_schema().await?;
    let read_model = PgReadModel::new(pool);
    read_model.initialize_schema().await?;

    let projector = Arc::new(Projector::new(Arc::new(store), Arc::new(read_model)));
    let settings = TimeoutSettings {
        poll_interval_secs: cli.poll_interval_secs,
        heartbeat_timeout_secs: cli.heartbeat_timeout_secs,
    };
    let monitor = Arc::new(
        TimeoutMonitor::new(projector, settings).on_disconnect(Arc::new(|record| {
            tracing::warn!(
                gateway_id = %record.gateway_id,
                error = record.error.as_deref().unwrap_or(""),
                "gateway disconnected by timeout"
            );
        })),
    );

    let frontend = Transport::tcp(&cli.broker_host, cli.broker_frontend_port);
    let publisher = Arc::new(
        with_backoff("broker frontend", &BackoffPolicy::default(), || {
            ZmqPublisher::connect(&frontend)
        })
        .await?,
    );

    let worker = Arc::new(MonitorWorker {
        monitor,
        shutdown: Arc::new(Notify::new()),
        handle: Mutex::new(None),
    });

    let config = WorkerBuilder::new("timeout-monitor").build();
    WorkerRunner::run(worker, publisher, config, None).await?;

    Ok(())
}
