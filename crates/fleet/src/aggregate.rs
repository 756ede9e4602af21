//! The gateway aggregate: a pure, replayable fold over the event log.
//!
//! The fold is total — every syntactically valid event applies without
//! error. Illegal or redundant transitions are logged and ignored so that
//! the aggregate remains a pure function of its event history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::event::{EventRecord, EventType, UpdateKind};

/// Lifecycle state derived from the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    Created,
    Connected,
    Disconnected,
    /// Terminal: once reached, no further event changes the aggregate.
    Deleted,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Installed,
    Removed,
}

/// Certificate bookkeeping carried on the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub status: CertificateStatus,
    pub installed_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl CertificateInfo {
    /// Whether a certificate is logically present on the gateway.
    pub fn is_installed(&self) -> bool {
        self.status == CertificateStatus::Installed
    }
}

/// Current gateway status, fully determined by replaying the aggregate's
/// event list from empty initial state in version order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAggregate {
    pub gateway_id: String,
    pub state: GatewayState,
    pub name: Option<String>,
    pub location: Option<String>,
    pub certificate_info: Option<CertificateInfo>,
    pub created_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub health: Option<String>,
    pub uptime: Option<String>,
    pub error: Option<String>,
    /// Number of events folded so far.
    version: i64,
}

impl GatewayAggregate {
    /// Empty initial state for the given gateway id.
    pub fn empty(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            state: GatewayState::Created,
            name: None,
            location: None,
            certificate_info: None,
            created_at: None,
            connected_at: None,
            disconnected_at: None,
            deleted_at: None,
            last_heartbeat: None,
            last_updated: None,
            health: None,
            uptime: None,
            error: None,
            version: -1,
        }
    }

    /// Replay a full ordered event history from empty state.
    pub fn replay(gateway_id: &str, events: &[EventRecord]) -> Self {
        let mut aggregate = Self::empty(gateway_id);
        for event in events {
            aggregate.apply(event);
        }
        aggregate
    }

    /// Version of the last folded event, or -1 before any event.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The most recent liveness signal: the later of the last heartbeat
    /// and the last applied event. Status reports count as liveness.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat.max(self.last_updated)
    }

    /// Whether a certificate is logically present.
    pub fn has_certificate(&self) -> bool {
        self.certificate_info
            .as_ref()
            .map(CertificateInfo::is_installed)
            .unwrap_or(false)
    }

    /// Fold one event into the aggregate.
    ///
    /// Mutates only derived fields and the internal version counter.
    /// Never fails: illegal transitions are logged and ignored.
    pub fn apply(&mut self, event: &EventRecord) {
        self.version += 1;

        // Terminal state: everything after deletion is a logged no-op.
        if self.state == GatewayState::Deleted && event.event_type != EventType::GatewayDeleted {
            debug!(
                gateway_id = %self.gateway_id,
                event_type = %event.event_type,
                version = event.version,
                "event ignored, gateway already deleted"
            );
            return;
        }

        self.last_updated = Some(event.timestamp);

        match event.event_type {
            EventType::GatewayCreated => self.apply_created(event),
            EventType::GatewayConnected => self.apply_connected(event),
            EventType::GatewayDisconnected => self.apply_disconnected(event),
            EventType::GatewayUpdated => self.apply_updated(event),
            EventType::GatewayDeleted => self.apply_deleted(event),
        }
    }

    fn apply_created(&mut self, event: &EventRecord) {
        if self.created_at.is_some() {
            warn!(
                gateway_id = %self.gateway_id,
                version = event.version,
                "GatewayCreated seen after initial event, ignoring"
            );
            return;
        }
        self.name = event
            .event_data
            .get("name")
            .and_then(Value::as_str)
            .map(String::from);
        self.location = event
            .event_data
            .get("location")
            .and_then(Value::as_str)
            .map(String::from);
        self.created_at = Some(event.timestamp);
        self.state = GatewayState::Created;
        debug!(gateway_id = %self.gateway_id, "gateway created");
    }

    fn apply_connected(&mut self, event: &EventRecord) {
        match self.state {
            GatewayState::Created | GatewayState::Disconnected => {
                self.state = GatewayState::Connected;
                self.connected_at = Some(event.timestamp);
                self.error = None;
                debug!(gateway_id = %self.gateway_id, "gateway connected");
            }
            current => {
                debug!(
                    gateway_id = %self.gateway_id,
                    state = %current,
                    "GatewayConnected not applicable, ignoring"
                );
            }
        }
    }

    fn apply_disconnected(&mut self, event: &EventRecord) {
        if self.state != GatewayState::Connected {
            debug!(
                gateway_id = %self.gateway_id,
                state = %self.state,
                "GatewayDisconnected not applicable, ignoring"
            );
            return;
        }
        self.state = GatewayState::Disconnected;
        self.disconnected_at = Some(event.timestamp);
        self.error = Some(disconnect_error(&event.event_data));
        info!(
            gateway_id = %self.gateway_id,
            error = self.error.as_deref().unwrap_or(""),
            "gateway disconnected"
        );
    }

    fn apply_updated(&mut self, event: &EventRecord) {
        match UpdateKind::classify(&event.event_data) {
            UpdateKind::Heartbeat => self.apply_heartbeat(event),
            UpdateKind::Status => self.apply_status_report(event),
        }
    }

    fn apply_heartbeat(&mut self, event: &EventRecord) {
        self.last_heartbeat = Some(event.timestamp);
        if let Some(uptime) = event.event_data.get("uptime") {
            self.uptime = Some(uptime.to_string());
        }

        // A heartbeat is sufficient proof of liveness: a disconnected
        // gateway that heartbeats is connected again.
        if self.state == GatewayState::Disconnected {
            self.state = GatewayState::Connected;
            self.connected_at = Some(event.timestamp);
            self.error = None;
            info!(gateway_id = %self.gateway_id, "heartbeat received while disconnected, reconnecting");
        }
    }

    fn apply_status_report(&mut self, event: &EventRecord) {
        let data = &event.event_data;

        if let Some(cert) = data.get("certificate_status") {
            self.apply_certificate_status(cert, event.timestamp);
        }

        match data.get("status").and_then(Value::as_str) {
            Some("online") => {
                if self.has_certificate() {
                    if matches!(self.state, GatewayState::Created | GatewayState::Disconnected) {
                        self.state = GatewayState::Connected;
                        self.connected_at = Some(event.timestamp);
                        self.error = None;
                    }
                } else {
                    warn!(
                        gateway_id = %self.gateway_id,
                        "gateway reports online without installed certificate, staying in {}",
                        self.state
                    );
                }
            }
            Some("offline") => {
                if self.state == GatewayState::Connected {
                    self.state = GatewayState::Disconnected;
                    self.disconnected_at = Some(event.timestamp);
                }
            }
            Some("deleted") => {
                self.state = GatewayState::Deleted;
                self.deleted_at = Some(event.timestamp);
            }
            Some(other) => {
                debug!(gateway_id = %self.gateway_id, status = other, "unrecognized status value, ignoring");
            }
            None => {}
        }

        if let Some(health) = data.get("health").and_then(Value::as_str) {
            self.health = Some(health.to_string());
        }
    }

    fn apply_certificate_status(&mut self, cert: &Value, at: DateTime<Utc>) {
        match cert.get("status").and_then(Value::as_str) {
            Some("installed") => {
                self.certificate_info = Some(CertificateInfo {
                    status: CertificateStatus::Installed,
                    installed_at: Some(at),
                    removed_at: None,
                });
                debug!(gateway_id = %self.gateway_id, "certificate installed");
            }
            Some("removed") => {
                self.certificate_info = None;
                // A gateway cannot stay connected without its certificate.
                if self.state == GatewayState::Connected {
                    self.state = GatewayState::Disconnected;
                    self.disconnected_at = Some(at);
                    self.error = Some("certificate removed".to_string());
                    info!(gateway_id = %self.gateway_id, "certificate removed, forcing disconnect");
                }
            }
            other => {
                debug!(
                    gateway_id = %self.gateway_id,
                    status = ?other,
                    "unrecognized certificate status, ignoring"
                );
            }
        }
    }

    fn apply_deleted(&mut self, event: &EventRecord) {
        if self.state == GatewayState::Deleted {
            debug!(gateway_id = %self.gateway_id, "gateway already deleted");
            return;
        }
        self.state = GatewayState::Deleted;
        self.deleted_at = Some(event.timestamp);
        info!(gateway_id = %self.gateway_id, "gateway deleted");
    }
}

/// Build the diagnostic error string for a disconnect payload.
///
/// An embedded ISO timestamp is reformatted into a display form; a missing
/// or unparsable timestamp leaves just the reason.
fn disconnect_error(data: &Value) -> String {
    let reason = data
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("disconnected");

    match data
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    {
        Some(ts) => format!(
            "{reason} at {}",
            ts.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => reason.to_string(),
    }
}
