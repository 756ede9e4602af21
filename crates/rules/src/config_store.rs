//! Per-gateway configuration storage inside the rules engine.
//!
//! One YAML blob per gateway, last-write-wins, no history. The store also
//! tracks where each blob is in the delivery lifecycle so operators can
//! see whether a gateway has picked its configuration up yet.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery lifecycle of a stored configuration.
///
/// The engine itself only drives Stored → Notifying → WaitingForAck →
/// Completed; the remaining states exist for callers that stage
/// configurations ahead of a gateway's first request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigDeliveryStatus {
    Idle,
    Stored,
    WaitingForRequest,
    Notifying,
    WaitingForAck,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct ConfigEntry {
    yaml_config: String,
    status: ConfigDeliveryStatus,
    updated_at: DateTime<Utc>,
}

/// Injected configuration store abstraction.
///
/// Readers (config lookup, status reporting) may run concurrently;
/// writers take exclusive access.
pub trait ConfigStore: Send + Sync {
    /// Store a configuration blob, replacing any previous one.
    fn store(&self, gateway_id: &str, yaml_config: String);

    /// Latest stored blob for a gateway, if any.
    fn get(&self, gateway_id: &str) -> Option<String>;

    /// Advance the delivery status of a stored configuration. A no-op for
    /// unknown gateways.
    fn set_status(&self, gateway_id: &str, status: ConfigDeliveryStatus);

    /// Current delivery status. [`ConfigDeliveryStatus::Idle`] when nothing
    /// is stored.
    fn status(&self, gateway_id: &str) -> ConfigDeliveryStatus;

    /// When the entry was last stored or had its status advanced.
    fn updated_at(&self, gateway_id: &str) -> Option<DateTime<Utc>>;

    /// Gateways with a stored configuration, sorted.
    fn gateway_ids(&self) -> Vec<String>;
}

/// In-memory [`ConfigStore`] guarded by a read/write lock.
#[derive(Default)]
pub struct MemoryConfigStore {
    entries: RwLock<HashMap<String, ConfigEntry>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn store(&self, gateway_id: &str, yaml_config: String) {
        let mut entries = self.entries.write().expect("config store lock poisoned");
        entries.insert(
            gateway_id.to_string(),
            ConfigEntry {
                yaml_config,
                status: ConfigDeliveryStatus::Stored,
                updated_at: Utc::now(),
            },
        );
    }

    fn get(&self, gateway_id: &str) -> Option<String> {
        let entries = self.entries.read().expect("config store lock poisoned");
        entries.get(gateway_id).map(|e| e.yaml_config.clone())
    }

    fn set_status(&self, gateway_id: &str, status: ConfigDeliveryStatus) {
        let mut entries = self.entries.write().expect("config store lock poisoned");
        if let Some(entry) = entries.get_mut(gateway_id) {
            entry.status = status;
            entry.updated_at = Utc::now();
        }
    }

    fn status(&self, gateway_id: &str) -> ConfigDeliveryStatus {
        let entries = self.entries.read().expect("config store lock poisoned");
        entries
            .get(gateway_id)
            .map(|e| e.status)
            .unwrap_or(ConfigDeliveryStatus::Idle)
    }

    fn updated_at(&self, gateway_id: &str) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().expect("config store lock poisoned");
        entries.get(gateway_id).map(|e| e.updated_at)
    }

    fn gateway_ids(&self) -> Vec<String> {
        let entries = self.entries.read().expect("config store lock poisoned");
        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}
