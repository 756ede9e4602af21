//! One simulated measurement device.
//!
//! Each device owns a periodic emission task with a dedicated stop
//! signal, so teardown is cooperative and never blocks the rest of the
//! fleet. Configuration swaps go through a suspend/swap/resume cycle
//! driven by the device manager.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use ponder_core::topics;
use ponder_messaging::{EventPublisher, Message};

use crate::gateway_config::ParamMap;

/// Shortest supported emission period; guards against a zero interval in
/// the configuration.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceStats {
    pub measurement_count: u64,
    pub total_weight: f64,
}

#[derive(Debug)]
struct DeviceState {
    device_config: ParamMap,
    config_version: String,
    active_parameter_set: String,
    update_in_progress: bool,
    suspend_measurement: bool,
    stats: DeviceStats,
}

pub struct SimulatedDevice {
    pub device_id: String,
    pub gateway_id: String,
    pub device_type: String,
    state: Arc<RwLock<DeviceState>>,
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl SimulatedDevice {
    /// Create the device and start its measurement loop.
    pub fn spawn(
        device_id: impl Into<String>,
        gateway_id: impl Into<String>,
        device_type: impl Into<String>,
        device_config: ParamMap,
        config_version: String,
        active_parameter_set: String,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let device_id = device_id.into();
        let gateway_id = gateway_id.into();
        let device_type = device_type.into();

        let state = Arc::new(RwLock::new(DeviceState {
            device_config,
            config_version,
            active_parameter_set,
            update_in_progress: false,
            suspend_measurement: false,
            stats: DeviceStats::default(),
        }));

        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn(measurement_loop(
            device_id.clone(),
            gateway_id.clone(),
            state.clone(),
            stop.clone(),
            publisher,
        ));

        Self {
            device_id,
            gateway_id,
            device_type,
            state,
            stop,
            handle,
        }
    }

    pub fn config_version(&self) -> String {
        self.state.read().expect("device state lock poisoned").config_version.clone()
    }

    pub fn active_parameter_set(&self) -> String {
        self.state
            .read()
            .expect("device state lock poisoned")
            .active_parameter_set
            .clone()
    }

    pub fn stats(&self) -> DeviceStats {
        self.state.read().expect("device state lock poisoned").stats
    }

    pub fn is_updating(&self) -> bool {
        self.state.read().expect("device state lock poisoned").update_in_progress
    }

    /// Suspend measurement emission for a configuration swap.
    pub fn begin_update(&self) {
        let mut state = self.state.write().expect("device state lock poisoned");
        state.update_in_progress = true;
        state.suspend_measurement = true;
        debug!(device_id = %self.device_id, "measurement suspended for update");
    }

    /// Swap in a new effective configuration and parameter set.
    pub fn apply_config(&self, config: ParamMap, version: String, parameter_set: String) {
        let mut state = self.state.write().expect("device state lock poisoned");
        state.device_config = config;
        state.config_version = version;
        state.active_parameter_set = parameter_set;
    }

    /// Resume measurement emission after a swap.
    pub fn finish_update(&self) {
        let mut state = self.state.write().expect("device state lock poisoned");
        state.update_in_progress = false;
        state.suspend_measurement = false;
        debug!(device_id = %self.device_id, "measurement resumed");
    }

    /// Stop the measurement loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        if let Err(e) = self.handle.await {
            warn!(device_id = %self.device_id, error = %e, "measurement task panicked");
        }
    }
}

/// Periodic measurement emission until the stop signal fires.
async fn measurement_loop(
    device_id: String,
    gateway_id: String,
    state: Arc<RwLock<DeviceState>>,
    stop: Arc<Notify>,
    publisher: Arc<dyn EventPublisher>,
) {
    let topic = topics::measurement(&gateway_id, &device_id);
    loop {
        let interval = {
            let state = state.read().expect("device state lock poisoned");
            state
                .device_config
                .get("interval_secs")
                .and_then(Value::as_f64)
                .map(Duration::from_secs_f64)
                .unwrap_or(Duration::from_secs(5))
                .max(MIN_INTERVAL)
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.notified() => {
                debug!(device_id = %device_id, "measurement loop stopped");
                return;
            }
        }

        let payload = {
            let mut state = state.write().expect("device state lock poisoned");
            if state.suspend_measurement {
                continue;
            }
            let measurement = generate_measurement(&state.device_config, &state.active_parameter_set);
            if let Some(weight) = measurement["weight_kg"].as_f64() {
                state.stats.measurement_count += 1;
                state.stats.total_weight += weight;
            }
            json!({
                "gateway_id": gateway_id,
                "device_id": device_id,
                "event_type": "measurement",
                "timestamp": Utc::now().to_rfc3339(),
                "measurement_id": Uuid::new_v4(),
                "payload": measurement,
            })
        };

        match Message::json(topic.as_str(), &payload) {
            Ok(message) => {
                if let Err(e) = publisher.publish(message).await {
                    warn!(device_id = %device_id, error = %e, "failed to publish measurement");
                }
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "failed to serialize measurement");
            }
        }
    }
}

/// One simulated reading: a random weight inside the configured bounds
/// plus the active parameter set's fields.
fn generate_measurement(config: &ParamMap, parameter_set: &str) -> Value {
    let min = config
        .get("min_weight_kg")
        .and_then(Value::as_f64)
        .unwrap_or(0.5);
    let max = config
        .get("max_weight_kg")
        .and_then(Value::as_f64)
        .unwrap_or(100.0)
        .max(min);
    let units = config
        .get("units")
        .and_then(Value::as_str)
        .unwrap_or("kg");

    let weight = if max > min {
        rand::thread_rng().gen_range(min..max)
    } else {
        min
    };

    let mut payload = json!({
        "weight_kg": (weight * 100.0).round() / 100.0,
        "units": units,
        "timestamp_ms": Utc::now().timestamp_millis(),
        "parameter_set": parameter_set,
    });

    // Parameter fields ride along so downstream consumers see the active
    // calibration without a second lookup.
    for (key, value) in config {
        if !matches!(
            key.as_str(),
            "interval_secs" | "min_weight_kg" | "max_weight_kg" | "units"
        ) {
            payload[key.as_str()] = value.clone();
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ponder_messaging::MessagingError;
    use tokio::sync::Mutex;

    struct MockPublisher {
        messages: Mutex<Vec<Message>>,
    }

    impl MockPublisher {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventPublisher for MockPublisher {
        async fn publish(&self, message: Message) -> Result<(), MessagingError> {
            self.messages.lock().await.push(message);
            Ok(())
        }
    }

    fn fast_config() -> ParamMap {
        let mut config = ParamMap::new();
        config.insert("interval_secs".to_string(), json!(0.02));
        config.insert("min_weight_kg".to_string(), json!(1.0));
        config.insert("max_weight_kg".to_string(), json!(2.0));
        config.insert("units".to_string(), json!("kg"));
        config.insert("precision".to_string(), json!(2));
        config
    }

    #[tokio::test]
    async fn device_emits_measurements_on_its_topic() {
        let publisher = Arc::new(MockPublisher::new());
        let device = SimulatedDevice::spawn(
            "dev-0",
            "g1",
            "scale",
            fast_config(),
            "v1".to_string(),
            "standard".to_string(),
            publisher.clone(),
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        device.shutdown().await;

        let messages = publisher.messages.lock().await;
        assert!(!messages.is_empty(), "device should have emitted");
        let first = &messages[0];
        assert_eq!(first.topic, "gateway/g1/device/dev-0/measurement");

        let body: Value = first.decode_json().unwrap();
        assert_eq!(body["event_type"], "measurement");
        assert_eq!(body["device_id"], "dev-0");
        let weight = body["payload"]["weight_kg"].as_f64().unwrap();
        assert!((1.0..=2.0).contains(&weight), "weight {weight} out of bounds");
        assert_eq!(body["payload"]["parameter_set"], "standard");
        assert_eq!(body["payload"]["precision"], 2);
        assert_eq!(body["payload"]["units"], "kg");
    }

    #[tokio::test]
    async fn suspended_device_stays_silent() {
        let publisher = Arc::new(MockPublisher::new());
        let device = SimulatedDevice::spawn(
            "dev-0",
            "g1",
            "scale",
            fast_config(),
            "v1".to_string(),
            "standard".to_string(),
            publisher.clone(),
        );

        device.begin_update();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let silent_count = publisher.messages.lock().await.len();

        device.finish_update();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let resumed_count = publisher.messages.lock().await.len();

        device.shutdown().await;
        assert!(
            resumed_count > silent_count,
            "emission should resume after the update window"
        );
        assert!(silent_count <= 1, "at most one in-flight emission before suspend");
    }

    #[tokio::test]
    async fn stats_accumulate() {
        let publisher = Arc::new(MockPublisher::new());
        let device = SimulatedDevice::spawn(
            "dev-0",
            "g1",
            "scale",
            fast_config(),
            "v1".to_string(),
            "standard".to_string(),
            publisher.clone(),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        let stats = device.stats();
        device.shutdown().await;

        assert!(stats.measurement_count > 0);
        assert!(stats.total_weight >= stats.measurement_count as f64 * 1.0);
    }
}
