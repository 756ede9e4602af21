//! Server side of the configuration distribution protocol.
//!
//! Three named handlers, wired into rules as `function` actions:
//! - `handle_new_config` stores an incoming `{gateway_id, yaml_config}`
//!   payload (last-write-wins)
//! - `handle_config_request` answers `gateway/<id>/request_config` by
//!   republishing the stored YAML verbatim to `gateway/<id>/config/update`;
//!   an unknown gateway id produces no reply at all
//! - `handle_config_delivered` records the agent's delivery ack
//!
//! Delivery status moves Stored → Notifying → WaitingForAck → Completed.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use ponder_core::topics;
use ponder_messaging::{EventPublisher, Message};

use crate::config_store::{ConfigDeliveryStatus, ConfigStore};
use crate::error::RulesError;

pub struct ConfigProtocol {
    store: Arc<dyn ConfigStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl ConfigProtocol {
    pub fn new(store: Arc<dyn ConfigStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Dispatch a `function` action by name.
    ///
    /// Unknown names are logged and dropped, matching the fate of any
    /// other failed action.
    pub async fn dispatch(&self, name: &str, topic: &str, payload: &Value) -> Result<(), RulesError> {
        match name {
            "handle_new_config" => self.handle_new_config(payload),
            "handle_config_request" => self.handle_config_request(topic).await,
            "handle_config_delivered" => {
                self.handle_config_delivered(topic, payload);
                Ok(())
            }
            other => {
                warn!(function = %other, topic = %topic, "unknown function action");
                Ok(())
            }
        }
    }

    /// Validate and store a new configuration blob.
    pub fn handle_new_config(&self, payload: &Value) -> Result<(), RulesError> {
        let gateway_id = payload
            .get("gateway_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RulesError::Protocol("missing gateway_id".to_string()))?;
        let yaml_config = payload
            .get("yaml_config")
            .and_then(Value::as_str)
            .ok_or_else(|| RulesError::Protocol("missing yaml_config".to_string()))?;

        self.store.store(gateway_id, yaml_config.to_string());
        info!(
            gateway_id = %gateway_id,
            bytes = yaml_config.len(),
            "configuration stored"
        );
        Ok(())
    }

    /// Answer a configuration pull request.
    ///
    /// The stored YAML is republished byte-for-byte. Absence of a stored
    /// configuration is a silent no-op, never an error topic.
    pub async fn handle_config_request(&self, topic: &str) -> Result<(), RulesError> {
        let Some(gateway_id) = topics::parse_request_config(topic) else {
            debug!(topic = %topic, "not a request_config topic, ignoring");
            return Ok(());
        };

        let Some(yaml_config) = self.store.get(gateway_id) else {
            debug!(gateway_id = %gateway_id, "no stored configuration, no reply");
            return Ok(());
        };

        self.store
            .set_status(gateway_id, ConfigDeliveryStatus::Notifying);

        let update = Message::raw(topics::config_update(gateway_id), yaml_config.into_bytes());
        self.publisher.publish(update).await?;

        self.store
            .set_status(gateway_id, ConfigDeliveryStatus::WaitingForAck);
        info!(gateway_id = %gateway_id, "configuration published");
        Ok(())
    }

    /// Record a delivery acknowledgment from the agent.
    pub fn handle_config_delivered(&self, topic: &str, payload: &Value) {
        let Some((gateway_id, "config/delivered")) = topics::parse_gateway_topic(topic) else {
            debug!(topic = %topic, "not a config/delivered topic, ignoring");
            return;
        };

        let ack_status = payload
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        if ack_status == "success" {
            self.store
                .set_status(gateway_id, ConfigDeliveryStatus::Completed);
        } else {
            self.store
                .set_status(gateway_id, ConfigDeliveryStatus::Failed);
        }
        info!(gateway_id = %gateway_id, ack = %ack_status, "delivery acknowledged");
    }
}
