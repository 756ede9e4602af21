//! Topic constants and parsers for the gateway broker namespace.
//!
//! Gateway topics follow the MQTT-style shape `gateway/<id>/<event>` with
//! `/`-separated segments. The rules engine matches these with `+`/`#`
//! wildcards; this module provides the canonical formatters and the
//! positional parsers used when a topic has to be taken apart again.

use crate::error::CoreError;

/// Worker liveness pings published by every long-running process.
pub const WORKER_HEALTH: &str = "fleet/worker/health";

/// Topic segment that marks a configuration pull request.
pub const REQUEST_CONFIG_SEGMENT: &str = "request_config";

/// Control channel for a single gateway: `control/<id>`.
pub fn control(gateway_id: &str) -> String {
    format!("control/{gateway_id}")
}

/// Agent → engine: ask for the current configuration.
pub fn request_config(gateway_id: &str) -> String {
    format!("gateway/{gateway_id}/request_config")
}

/// Engine → agent: configuration payload delivery.
pub fn config_update(gateway_id: &str) -> String {
    format!("gateway/{gateway_id}/config/update")
}

/// Agent → engine: delivery acknowledgment.
pub fn config_delivered(gateway_id: &str) -> String {
    format!("gateway/{gateway_id}/config/delivered")
}

/// Agent → engine: periodic liveness report.
pub fn heartbeat(gateway_id: &str) -> String {
    format!("gateway/{gateway_id}/heartbeat")
}

/// Agent → engine: a single device measurement.
pub fn measurement(gateway_id: &str, device_id: &str) -> String {
    format!("gateway/{gateway_id}/device/{device_id}/measurement")
}

/// Positional parse of a `gateway/<id>/<event...>` topic.
///
/// Returns `(gateway_id, event_type)` where the event type is everything
/// after the id, joined back with `/` (so `gateway/g1/config/update`
/// yields `("g1", "config/update")`).
pub fn parse_gateway_topic(topic: &str) -> Option<(&str, &str)> {
    let rest = topic.strip_prefix("gateway/")?;
    let (gateway_id, event) = rest.split_once('/')?;
    if gateway_id.is_empty() || event.is_empty() {
        return None;
    }
    Some((gateway_id, event))
}

/// Parse a `gateway/<id>/device/<device_id>/measurement` topic.
pub fn parse_device_topic(topic: &str) -> Result<(String, String), CoreError> {
    let malformed = |reason: &str| CoreError::Topic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };

    let segments: Vec<&str> = topic.split('/').collect();
    match segments.as_slice() {
        ["gateway", gateway_id, "device", device_id, "measurement"] => {
            if gateway_id.is_empty() || device_id.is_empty() {
                return Err(malformed("empty gateway or device id"));
            }
            Ok((gateway_id.to_string(), device_id.to_string()))
        }
        _ => Err(malformed("expected gateway/<id>/device/<id>/measurement")),
    }
}

/// Parse the gateway id out of a `gateway/<id>/request_config` topic.
pub fn parse_request_config(topic: &str) -> Option<&str> {
    match parse_gateway_topic(topic) {
        Some((gateway_id, REQUEST_CONFIG_SEGMENT)) => Some(gateway_id),
        _ => None,
    }
}
