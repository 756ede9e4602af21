use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use zeromq::prelude::*;
use zeromq::{PubSocket, RepSocket, SubSocket, ZmqMessage};

use crate::error::MessagingError;
use crate::transport::Transport;

/// Counters collected by the broker during message proxying.
#[derive(Debug)]
pub struct BrokerMetrics {
    /// Total messages forwarded through the proxy.
    pub total_messages: AtomicU64,
    /// Per-topic message counts.
    pub topic_counts: Mutex<HashMap<String, u64>>,
}

impl BrokerMetrics {
    fn new() -> Self {
        Self {
            total_messages: AtomicU64::new(0),
            topic_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of total forwarded messages.
    pub fn total(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }
}

/// Configuration for the event broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Frontend endpoint where publishers connect (broker binds SUB here).
    pub frontend: Transport,
    /// Backend endpoint where subscribers connect (broker binds PUB here).
    pub backend: Transport,
    /// Health check endpoint (REP socket for liveness probes).
    pub health: Transport,
}

impl BrokerConfig {
    /// Create a local IPC broker configuration.
    pub fn local() -> Self {
        Self {
            frontend: Transport::ipc("broker-frontend"),
            backend: Transport::ipc("broker-backend"),
            health: Transport::ipc("broker-health"),
        }
    }

    /// Create a TCP broker configuration.
    pub fn tcp(host: &str, frontend_port: u16, backend_port: u16, health_port: u16) -> Self {
        Self {
            frontend: Transport::tcp(host, frontend_port),
            backend: Transport::tcp(host, backend_port),
            health: Transport::tcp(host, health_port),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::local()
    }
}

/// Central PUB/SUB rendezvous point for gateway traffic.
///
/// - Gateway agents and the rules engine connect publishers to the
///   **frontend** (SUB socket that the broker binds).
/// - Subscribers connect to the **backend** (PUB socket that the broker
///   binds).
/// - Messages received on frontend are forwarded to backend verbatim.
///
/// Since `zeromq` 0.4 does not provide XPUB/XSUB socket types, the proxy
/// pattern is emulated with PUB+SUB; the broker subscribes to all topics.
pub struct EventBroker {
    config: BrokerConfig,
    metrics: Arc<BrokerMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl EventBroker {
    /// Create a new broker with the given configuration.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(BrokerMetrics::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Access the broker's forwarding counters.
    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }

    /// Signal the broker to shut down gracefully.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Run the broker proxy loop.
    ///
    /// Binds three sockets: SUB (frontend), PUB (backend), REP (health).
    /// Returns when shutdown is signaled or an unrecoverable error occurs.
    pub async fn run(&self) -> Result<(), MessagingError> {
        for transport in [&self.config.frontend, &self.config.backend, &self.config.health] {
            transport.prepare_bind().map_err(|e| {
                MessagingError::Transport(format!("failed to prepare {transport}: {e}"))
            })?;
        }

        let mut frontend = SubSocket::new();
        frontend.bind(&self.config.frontend.endpoint()).await?;
        // Subscribe to all topics so every message is forwarded.
        frontend.subscribe("").await?;

        tracing::info!(
            endpoint = %self.config.frontend.endpoint(),
            "broker frontend (SUB) bound, publishers connect here"
        );

        let mut backend = PubSocket::new();
        backend.bind(&self.config.backend.endpoint()).await?;

        tracing::info!(
            endpoint = %self.config.backend.endpoint(),
            "broker backend (PUB) bound, subscribers connect here"
        );

        let mut health = RepSocket::new();
        health.bind(&self.config.health.endpoint()).await?;

        tracing::info!(
            endpoint = %self.config.health.endpoint(),
            "broker health check (REP) bound"
        );

        let shutdown_flag = self.shutdown.clone();
        tokio::spawn(async move {
            Self::health_loop(&mut health, &shutdown_flag).await;
        });

        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();

        tracing::info!("broker proxy loop started");

        loop {
            if shutdown.load(Ordering::SeqCst) {
                tracing::info!("broker shutting down");
                break;
            }

            // Use a timeout so we periodically check the shutdown flag.
            let recv_result =
                tokio::time::timeout(std::time::Duration::from_millis(100), frontend.recv()).await;

            let msg = match recv_result {
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "frontend recv error");
                    continue;
                }
                Err(_) => {
                    // Timeout, loop back to check the shutdown flag.
                    continue;
                }
            };

            let topic = extract_topic(&msg);

            metrics.total_messages.fetch_add(1, Ordering::Relaxed);
            {
                let mut counts = metrics.topic_counts.lock().await;
                *counts.entry(topic.clone()).or_insert(0) += 1;
            }

            tracing::debug!(
                topic = %topic,
                total = metrics.total_messages.load(Ordering::Relaxed),
                "forwarding message"
            );

            if let Err(e) = backend.send(msg).await {
                tracing::warn!(error = %e, "backend send error");
            }
        }

        tracing::info!(
            total = metrics.total_messages.load(Ordering::Relaxed),
            "broker stopped"
        );

        Ok(())
    }

    /// Health check responder loop — replies "ok" to any REQ.
    async fn health_loop(health: &mut RepSocket, shutdown: &AtomicBool) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            let recv_result =
                tokio::time::timeout(std::time::Duration::from_millis(500), health.recv()).await;

            match recv_result {
                Ok(Ok(_request)) => {
                    let reply: ZmqMessage = "ok".into();
                    if let Err(e) = health.send(reply).await {
                        tracing::warn!(error = %e, "health reply error");
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "health recv error");
                }
                Err(_) => {
                    // Timeout, loop back.
                }
            }
        }
    }
}

/// Extract a topic string from the first frame of a ZMQ message.
fn extract_topic(msg: &ZmqMessage) -> String {
    msg.iter()
        .next()
        .map(|frame| {
            String::from_utf8(frame.to_vec())
                .unwrap_or_else(|_| format!("<{} binary bytes>", frame.len()))
        })
        .unwrap_or_else(|| "<empty>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::pubsub::{ZmqPublisher, ZmqSubscriber};
    use crate::traits::{EventPublisher, EventSubscriber};

    #[test]
    fn broker_config_tcp_endpoints() {
        let cfg = BrokerConfig::tcp("0.0.0.0", 5555, 5556, 5557);
        assert_eq!(cfg.frontend.endpoint(), "tcp://0.0.0.0:5555");
        assert_eq!(cfg.backend.endpoint(), "tcp://0.0.0.0:5556");
        assert_eq!(cfg.health.endpoint(), "tcp://0.0.0.0:5557");
    }

    #[test]
    fn metrics_default_zero() {
        let m = BrokerMetrics::new();
        assert_eq!(m.total(), 0);
    }

    #[test]
    fn extract_topic_from_utf8_frame() {
        let msg: ZmqMessage = "gateway/g1/heartbeat".into();
        assert_eq!(extract_topic(&msg), "gateway/g1/heartbeat");
    }

    #[tokio::test]
    async fn broker_roundtrip() {
        let broker_cfg = BrokerConfig::tcp("127.0.0.1", 16710, 16711, 16712);

        let broker_handle = tokio::spawn({
            let cfg = broker_cfg.clone();
            async move {
                let broker = EventBroker::new(cfg);
                broker.run().await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let publisher = ZmqPublisher::connect(&Transport::tcp("127.0.0.1", 16710))
            .await
            .unwrap();
        let subscriber = ZmqSubscriber::connect(&Transport::tcp("127.0.0.1", 16711))
            .await
            .unwrap();
        subscriber.subscribe("gateway/").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let msg = Message::json(
            "gateway/g1/heartbeat",
            &serde_json::json!({"status": "online"}),
        )
        .unwrap();
        let correlation_id = msg.correlation_id;
        publisher.publish(msg).await.unwrap();

        let received =
            tokio::time::timeout(std::time::Duration::from_secs(3), subscriber.recv())
                .await
                .expect("timed out waiting for broker-forwarded message")
                .unwrap();

        assert_eq!(received.topic, "gateway/g1/heartbeat");
        assert_eq!(received.correlation_id, correlation_id);

        broker_handle.abort();
    }
}
