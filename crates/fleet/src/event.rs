//! Domain events for the gateway aggregate.
//!
//! Events are append-only: never mutated, never deleted. Total order
//! within an aggregate is the version number, not wall-clock time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Aggregate type constant — there is a single aggregate kind in this
/// system.
pub const AGGREGATE_TYPE_GATEWAY: &str = "gateway";

/// Closed set of gateway domain event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    GatewayCreated,
    GatewayConnected,
    GatewayDisconnected,
    GatewayDeleted,
    GatewayUpdated,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GatewayCreated => "GatewayCreated",
            Self::GatewayConnected => "GatewayConnected",
            Self::GatewayDisconnected => "GatewayDisconnected",
            Self::GatewayDeleted => "GatewayDeleted",
            Self::GatewayUpdated => "GatewayUpdated",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GatewayCreated" => Ok(Self::GatewayCreated),
            "GatewayConnected" => Ok(Self::GatewayConnected),
            "GatewayDisconnected" => Ok(Self::GatewayDisconnected),
            "GatewayDeleted" => Ok(Self::GatewayDeleted),
            "GatewayUpdated" => Ok(Self::GatewayUpdated),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Sub-type of a `GatewayUpdated` event, read out of its payload.
///
/// Heartbeats refresh liveness timestamps; status reports carry
/// certificate and status-string changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Heartbeat,
    Status,
}

impl UpdateKind {
    /// Classify an update payload.
    ///
    /// An explicit `update_type` field wins; otherwise the presence of
    /// `certificate_status` or `status` marks a status report, and
    /// anything else is treated as a heartbeat.
    pub fn classify(data: &Value) -> Self {
        match data.get("update_type").and_then(Value::as_str) {
            Some("status") => Self::Status,
            Some("heartbeat") => Self::Heartbeat,
            _ => {
                if data.get("certificate_status").is_some() || data.get("status").is_some() {
                    Self::Status
                } else {
                    Self::Heartbeat
                }
            }
        }
    }
}

/// A stored domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: EventType,
    pub event_data: Value,
    /// Strictly increasing per aggregate, starting at 0.
    pub version: i64,
    pub timestamp: DateTime<Utc>,
}

/// An event as submitted for appending; the store assigns version and
/// timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub aggregate_id: String,
    pub event_type: EventType,
    pub event_data: Value,
}

impl NewEvent {
    pub fn new(aggregate_id: impl Into<String>, event_type: EventType, event_data: Value) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            event_type,
            event_data,
        }
    }

    /// A creation event carrying the gateway's declared identity.
    pub fn created(aggregate_id: &str, name: &str, location: &str) -> Self {
        Self::new(
            aggregate_id,
            EventType::GatewayCreated,
            json!({ "name": name, "location": location }),
        )
    }

    /// A disconnect event with a reason and the moment it was detected.
    pub fn disconnected(aggregate_id: &str, reason: &str, at: DateTime<Utc>) -> Self {
        Self::new(
            aggregate_id,
            EventType::GatewayDisconnected,
            json!({ "reason": reason, "timestamp": at.to_rfc3339() }),
        )
    }

    /// A heartbeat update event.
    pub fn heartbeat(aggregate_id: &str, data: Value) -> Self {
        let mut data = data;
        if let Value::Object(ref mut map) = data {
            map.insert("update_type".into(), Value::String("heartbeat".into()));
        }
        Self::new(aggregate_id, EventType::GatewayUpdated, data)
    }

    /// A status-report update event.
    pub fn status_report(aggregate_id: &str, data: Value) -> Self {
        let mut data = data;
        if let Value::Object(ref mut map) = data {
            map.insert("update_type".into(), Value::String("status".into()));
        }
        Self::new(aggregate_id, EventType::GatewayUpdated, data)
    }
}
