//! Agent run loop: subscriptions, heartbeats, and the configuration
//! request/update/delivered exchange.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use ponder_core::topics;
use ponder_messaging::{EventPublisher, EventSubscriber, Message};

use crate::certificate::CertificateMonitor;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::gateway_config::GatewayConfig;
use crate::manager::DeviceManager;

/// What the message handler wants the run loop to do next.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct GatewayAgent {
    config: AgentConfig,
    publisher: Arc<dyn EventPublisher>,
    subscriber: Arc<dyn EventSubscriber>,
    certificate: CertificateMonitor,
    devices: Arc<DeviceManager>,
    /// Raw YAML of the currently applied configuration.
    current_config: RwLock<Option<String>>,
    started: Instant,
}

impl GatewayAgent {
    pub fn new(
        config: AgentConfig,
        publisher: Arc<dyn EventPublisher>,
        subscriber: Arc<dyn EventSubscriber>,
        certificate: CertificateMonitor,
    ) -> Self {
        let devices = Arc::new(DeviceManager::new(
            config.gateway_id.clone(),
            publisher.clone(),
        ));
        Self {
            config,
            publisher,
            subscriber,
            certificate,
            devices,
            current_config: RwLock::new(None),
            started: Instant::now(),
        }
    }

    pub fn devices(&self) -> &Arc<DeviceManager> {
        &self.devices
    }

    pub async fn current_config(&self) -> Option<String> {
        self.current_config.read().await.clone()
    }

    /// Subscribe, request the configuration, then process heartbeats and
    /// inbound messages until `shutdown` is notified or a delete control
    /// message arrives.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), AgentError> {
        let gateway_id = &self.config.gateway_id;
        self.subscriber
            .subscribe(&topics::control(gateway_id))
            .await?;
        self.subscriber
            .subscribe(&topics::config_update(gateway_id))
            .await?;

        // Let the subscriptions settle before the request, or the reply
        // can outrun them.
        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        self.request_config().await;

        info!(gateway_id = %gateway_id, "gateway agent started");
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval_secs));

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    self.send_heartbeat().await;
                }
                received = self.subscriber.recv() => {
                    match received {
                        Ok(message) => {
                            if self.handle_message(message).await == Flow::Stop {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to receive message");
                        }
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }

        self.devices.shutdown_all().await;
        info!(gateway_id = %gateway_id, "gateway agent stopped");
        Ok(())
    }

    /// Publish a configuration pull request.
    async fn request_config(&self) {
        let topic = topics::request_config(&self.config.gateway_id);
        let payload = json!({ "timestamp": Utc::now().to_rfc3339() });
        match Message::json(topic, &payload) {
            Ok(message) => {
                if let Err(e) = self.publisher.publish(message).await {
                    warn!(error = %e, "failed to publish config request");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize config request"),
        }
    }

    /// Periodic liveness report.
    ///
    /// `memory` and `cpu` are simulated; `tls_enabled` and the embedded
    /// `certificate_status` reflect the certificate monitor.
    pub async fn send_heartbeat(&self) {
        let installed = self.certificate.rescan();
        let (memory, cpu) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(20.0..60.0_f64), rng.gen_range(1.0..25.0_f64))
        };
        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "uptime": self.started.elapsed().as_secs(),
            "memory": (memory * 10.0).round() / 10.0,
            "cpu": (cpu * 10.0).round() / 10.0,
            "tls_enabled": installed,
            "status": "online",
            "certificate_status": self.certificate.status_value(),
        });

        let topic = topics::heartbeat(&self.config.gateway_id);
        match Message::json(topic, &payload) {
            Ok(message) => {
                if let Err(e) = self.publisher.publish(message).await {
                    warn!(error = %e, "failed to publish heartbeat");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize heartbeat"),
        }
    }

    /// Route one inbound message.
    async fn handle_message(&self, message: Message) -> Flow {
        let gateway_id = &self.config.gateway_id;
        if message.topic == topics::config_update(gateway_id) {
            self.apply_config_update(&message).await;
            Flow::Continue
        } else if message.topic == topics::control(gateway_id) {
            self.handle_control(&message).await
        } else {
            debug!(topic = %message.topic, "ignoring unrelated message");
            Flow::Continue
        }
    }

    /// Replace the active configuration, acknowledge delivery, and
    /// converge the device fleet.
    ///
    /// The acknowledgment is unconditional: once the bytes arrived,
    /// delivery succeeded, even if the YAML later fails to parse.
    async fn apply_config_update(&self, message: &Message) {
        let yaml = extract_yaml(message);
        *self.current_config.write().await = Some(yaml.clone());

        let ack = json!({ "status": "success", "timestamp": Utc::now().to_rfc3339() });
        let topic = topics::config_delivered(&self.config.gateway_id);
        match Message::json(topic, &ack) {
            Ok(reply) => {
                if let Err(e) = self.publisher.publish(reply).await {
                    warn!(error = %e, "failed to publish delivery ack");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize delivery ack"),
        }

        match GatewayConfig::parse(&yaml) {
            Ok(config) => {
                let report = self.devices.converge(&config).await;
                info!(
                    devices = config.devices.count,
                    created = report.created,
                    updated = report.updated,
                    "configuration applied"
                );
            }
            Err(e) => {
                warn!(error = %e, "received configuration does not parse, keeping devices as-is");
            }
        }
    }

    /// `{"type": "acknowledge" | "reset" | "delete"}` control messages.
    async fn handle_control(&self, message: &Message) -> Flow {
        let payload: Value = match message.decode_json() {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "malformed control message, ignoring");
                return Flow::Continue;
            }
        };

        match payload.get("type").and_then(Value::as_str) {
            Some("acknowledge") => {
                info!("control acknowledge received");
                Flow::Continue
            }
            Some("reset") => {
                info!("control reset received, clearing configuration and re-requesting");
                *self.current_config.write().await = None;
                self.request_config().await;
                Flow::Continue
            }
            Some("delete") => {
                info!("control delete received, shutting down");
                Flow::Stop
            }
            other => {
                warn!(control_type = ?other, "unknown control message, ignoring");
                Flow::Continue
            }
        }
    }
}

/// Configuration updates arrive either as raw YAML text or as a JSON
/// envelope with a `yaml_config` field.
fn extract_yaml(message: &Message) -> String {
    if let Ok(value) = message.decode_json::<Value>() {
        if let Some(yaml) = value.get("yaml_config").and_then(Value::as_str) {
            return yaml.to_string();
        }
    }
    message.payload_text()
}
