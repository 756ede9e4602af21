//! Device fleet convergence.
//!
//! The manager converges the live device set to whatever the active
//! gateway configuration declares: the target count decides creation and
//! removal, stable ordinal device ids preserve surviving devices across
//! passes, and a content hash of each device's effective configuration
//! gates the suspend/swap/resume update cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use ponder_messaging::EventPublisher;

use crate::device::SimulatedDevice;
use crate::gateway_config::{config_hash, GatewayConfig};

/// What one convergence pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub created: usize,
    pub removed: usize,
    pub updated: usize,
    pub unchanged: usize,
}

pub struct DeviceManager {
    gateway_id: String,
    publisher: Arc<dyn EventPublisher>,
    devices: RwLock<BTreeMap<String, SimulatedDevice>>,
}

impl DeviceManager {
    pub fn new(gateway_id: impl Into<String>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            publisher,
            devices: RwLock::new(BTreeMap::new()),
        }
    }

    /// Stable device id for an ordinal slot.
    fn device_id(&self, ordinal: usize) -> String {
        format!("dev-{ordinal}")
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn device_ids(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    /// Active parameter set of one device, if it exists.
    pub async fn parameter_set_of(&self, device_id: &str) -> Option<String> {
        self.devices
            .read()
            .await
            .get(device_id)
            .map(|d| d.active_parameter_set())
    }

    /// Converge the fleet to `config`.
    ///
    /// Surviving devices keep their id and statistics; only a changed
    /// effective-config hash triggers the suspend/swap/resume cycle.
    pub async fn converge(&self, config: &GatewayConfig) -> ConvergenceReport {
        let mut report = ConvergenceReport::default();
        let mut devices = self.devices.write().await;

        let target_ids: Vec<String> = (0..config.devices.count)
            .map(|i| self.device_id(i))
            .collect();

        // Tear down devices above the target count.
        let stale: Vec<String> = devices
            .keys()
            .filter(|id| !target_ids.contains(id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(device) = devices.remove(&id) {
                debug!(device_id = %id, "removing device");
                device.shutdown().await;
                report.removed += 1;
            }
        }

        for (ordinal, device_id) in target_ids.iter().enumerate() {
            let parameter_set = config.parameter_set_for(device_id, ordinal);
            let effective = config.effective_device_config(device_id, &parameter_set);
            let version = config_hash(&effective);

            match devices.get(device_id) {
                None => {
                    debug!(device_id = %device_id, parameter_set = %parameter_set, "creating device");
                    let device = SimulatedDevice::spawn(
                        device_id.clone(),
                        self.gateway_id.clone(),
                        config.devices.device_type.clone(),
                        effective,
                        version,
                        parameter_set,
                        self.publisher.clone(),
                    );
                    devices.insert(device_id.clone(), device);
                    report.created += 1;
                }
                Some(device) if device.config_version() == version => {
                    report.unchanged += 1;
                }
                Some(device) => {
                    debug!(device_id = %device_id, parameter_set = %parameter_set, "updating device");
                    device.begin_update();
                    device.apply_config(effective, version, parameter_set);
                    device.finish_update();
                    report.updated += 1;
                }
            }
        }

        info!(
            gateway_id = %self.gateway_id,
            created = report.created,
            removed = report.removed,
            updated = report.updated,
            unchanged = report.unchanged,
            "device convergence complete"
        );
        report
    }

    /// Stop every device and wait for their loops to exit.
    pub async fn shutdown_all(&self) {
        let mut devices = self.devices.write().await;
        let ids: Vec<String> = devices.keys().cloned().collect();
        for id in ids {
            if let Some(device) = devices.remove(&id) {
                device.shutdown().await;
            }
        }
    }
}
