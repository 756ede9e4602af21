//! Gateway configuration document and per-device effective config.
//!
//! The YAML delivered over `gateway/<id>/config/update` declares the
//! target device count, global measurement bounds, named parameter sets,
//! and optional per-device overrides:
//!
//! ```yaml
//! devices:
//!   count: 3
//!   type: scale
//! measurement:
//!   interval_secs: 5.0
//!   min_weight_kg: 0.5
//!   max_weight_kg: 120.0
//!   units: kg
//! parameter_sets:
//!   standard:
//!     tare_offset: 0.0
//!     precision: 2
//!   calibrated:
//!     tare_offset: -0.25
//!     precision: 3
//! device_parameter_sets:
//!   dev-0: calibrated
//! device_overrides:
//!   dev-1:
//!     max_weight_kg: 60.0
//! ```
//!
//! A device's effective configuration is the global measurement section
//! merged with its active parameter set merged with its override, in that
//! precedence order. The content hash of the effective configuration
//! decides whether a convergence pass must restart the device's
//! measurement emission.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Free-form key/value parameter map. `BTreeMap` keeps the hash input
/// deterministic.
pub type ParamMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub devices: DevicesSection,

    #[serde(default)]
    pub measurement: MeasurementSection,

    #[serde(default)]
    pub parameter_sets: BTreeMap<String, ParamMap>,

    /// Explicit device → parameter-set assignment. Devices not listed get
    /// a deterministic default from their ordinal parity.
    #[serde(default)]
    pub device_parameter_sets: BTreeMap<String, String>,

    #[serde(default)]
    pub device_overrides: BTreeMap<String, ParamMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicesSection {
    pub count: usize,

    #[serde(default = "default_device_type", rename = "type")]
    pub device_type: String,
}

fn default_device_type() -> String {
    "scale".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSection {
    /// Seconds between measurements (fractional for fast simulations).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,

    #[serde(default = "default_min_weight_kg")]
    pub min_weight_kg: f64,

    #[serde(default = "default_max_weight_kg")]
    pub max_weight_kg: f64,

    #[serde(default = "default_units")]
    pub units: String,
}

fn default_interval_secs() -> f64 {
    5.0
}

fn default_min_weight_kg() -> f64 {
    0.5
}

fn default_max_weight_kg() -> f64 {
    100.0
}

fn default_units() -> String {
    "kg".to_string()
}

impl Default for MeasurementSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            min_weight_kg: default_min_weight_kg(),
            max_weight_kg: default_max_weight_kg(),
            units: default_units(),
        }
    }
}

impl GatewayConfig {
    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Parameter set for a device: explicit mapping wins, else ordinal
    /// parity picks among the declared set names (sorted).
    pub fn parameter_set_for(&self, device_id: &str, ordinal: usize) -> String {
        if let Some(name) = self.device_parameter_sets.get(device_id) {
            return name.clone();
        }
        let names: Vec<&String> = self.parameter_sets.keys().collect();
        if names.is_empty() {
            return "default".to_string();
        }
        names[ordinal % names.len().min(2)].clone()
    }

    /// Global bounds ⊕ parameter set ⊕ per-device override.
    pub fn effective_device_config(&self, device_id: &str, parameter_set: &str) -> ParamMap {
        let mut effective = ParamMap::new();
        effective.insert(
            "interval_secs".to_string(),
            json_f64(self.measurement.interval_secs),
        );
        effective.insert(
            "min_weight_kg".to_string(),
            json_f64(self.measurement.min_weight_kg),
        );
        effective.insert(
            "max_weight_kg".to_string(),
            json_f64(self.measurement.max_weight_kg),
        );
        effective.insert(
            "units".to_string(),
            Value::String(self.measurement.units.clone()),
        );

        if let Some(params) = self.parameter_sets.get(parameter_set) {
            for (key, value) in params {
                effective.insert(key.clone(), value.clone());
            }
        }
        if let Some(overrides) = self.device_overrides.get(device_id) {
            for (key, value) in overrides {
                effective.insert(key.clone(), value.clone());
            }
        }
        effective
    }
}

fn json_f64(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Content hash of an effective device configuration.
pub fn config_hash(config: &ParamMap) -> String {
    let bytes = serde_json::to_vec(config).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
devices:
  count: 3
measurement:
  interval_secs: 2.0
  min_weight_kg: 1.0
  max_weight_kg: 120.0
parameter_sets:
  calibrated:
    tare_offset: -0.25
    precision: 3
  standard:
    tare_offset: 0.0
    precision: 2
device_parameter_sets:
  dev-0: calibrated
device_overrides:
  dev-1:
    max_weight_kg: 60.0
"#;

    #[test]
    fn parses_the_full_document() {
        let config = GatewayConfig::parse(YAML).unwrap();
        assert_eq!(config.devices.count, 3);
        assert_eq!(config.devices.device_type, "scale");
        assert_eq!(config.measurement.units, "kg");
        assert_eq!(config.parameter_sets.len(), 2);
    }

    #[test]
    fn minimal_document_fills_defaults() {
        let config = GatewayConfig::parse("devices:\n  count: 3\n").unwrap();
        assert_eq!(config.devices.count, 3);
        assert_eq!(config.measurement.interval_secs, 5.0);
        assert!(config.parameter_sets.is_empty());
    }

    #[test]
    fn explicit_parameter_set_mapping_wins() {
        let config = GatewayConfig::parse(YAML).unwrap();
        assert_eq!(config.parameter_set_for("dev-0", 0), "calibrated");
    }

    #[test]
    fn unmapped_devices_alternate_by_ordinal_parity() {
        let config = GatewayConfig::parse(YAML).unwrap();
        // Sorted set names: calibrated, standard.
        assert_eq!(config.parameter_set_for("dev-2", 2), "calibrated");
        assert_eq!(config.parameter_set_for("dev-3", 3), "standard");
    }

    #[test]
    fn no_parameter_sets_yields_default() {
        let config = GatewayConfig::parse("devices:\n  count: 1\n").unwrap();
        assert_eq!(config.parameter_set_for("dev-0", 0), "default");
    }

    #[test]
    fn merge_precedence_override_beats_set_beats_global() {
        let config = GatewayConfig::parse(YAML).unwrap();

        let effective = config.effective_device_config("dev-1", "standard");
        // Override wins over the global bound.
        assert_eq!(effective["max_weight_kg"], serde_json::json!(60.0));
        // Parameter set fields are merged in.
        assert_eq!(effective["precision"], serde_json::json!(2));
        // Untouched globals survive.
        assert_eq!(effective["min_weight_kg"], serde_json::json!(1.0));
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let config = GatewayConfig::parse(YAML).unwrap();
        let a = config.effective_device_config("dev-0", "calibrated");
        let b = config.effective_device_config("dev-0", "calibrated");
        assert_eq!(config_hash(&a), config_hash(&b));

        let c = config.effective_device_config("dev-0", "standard");
        assert_ne!(config_hash(&a), config_hash(&c));
    }
}
