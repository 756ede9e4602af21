use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire-format message envelope for broker traffic.
///
/// The envelope itself is serialized with MessagePack; the payload is
/// carried as raw bytes because gateway traffic is heterogeneous — JSON
/// documents for heartbeats and measurements, raw YAML text for
/// configuration delivery. The `topic` field drives PUB/SUB routing and
/// wildcard matching; `correlation_id` ties request/ack exchanges together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Routing topic (e.g. "gateway/g1/heartbeat").
    pub topic: String,

    /// Raw payload bytes — JSON, YAML, or empty.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// When this message was created.
    pub timestamp: DateTime<Utc>,

    /// Correlation ID for request/ack tracking.
    pub correlation_id: Uuid,

    /// Schema version for forward-compatible evolution.
    #[serde(default = "default_version")]
    pub version: u16,
}

/// Default version for messages that omit the field (backward compat).
fn default_version() -> u16 {
    1
}

impl Message {
    /// Create a message carrying a JSON-encoded payload.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::raw(topic, serde_json::to_vec(payload)?))
    }

    /// Create a message carrying arbitrary payload bytes (e.g. raw YAML).
    pub fn raw(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            version: 1,
        }
    }

    /// Create a message with an explicit correlation ID (for replies/acks).
    pub fn with_correlation(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            correlation_id,
            ..Self::raw(topic, payload)
        }
    }

    /// Deserialize the payload as JSON into the expected type.
    pub fn decode_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Payload as UTF-8 text, replacing invalid sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Serialize this entire message envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize a message envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
