//! Queryable projection of gateway aggregate state.
//!
//! The read model is denormalized and kept in sync with the event log by
//! the [`Projector`](crate::projector::Projector); it exists for fast
//! lookups (operator dashboards, the timeout monitor's scan) and is never
//! the source of truth.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{GatewayAggregate, GatewayState};
use crate::error::FleetError;

/// Operator-facing health vocabulary.
///
/// Deliberately distinct from [`GatewayState`]: the state enum is the
/// lifecycle truth derived from events, while the health label is a
/// display-level summary derived at projection time. The timeout monitor
/// gates on state, not on this label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLabel {
    Healthy,
    Stale,
    Unknown,
}

impl HealthLabel {
    pub fn from_state(state: GatewayState) -> Self {
        match state {
            GatewayState::Connected => Self::Healthy,
            GatewayState::Disconnected => Self::Stale,
            GatewayState::Created | GatewayState::Deleted => Self::Unknown,
        }
    }
}

/// One denormalized read-model row per gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRecord {
    pub gateway_id: String,
    pub state: GatewayState,
    pub health: HealthLabel,
    pub name: Option<String>,
    pub location: Option<String>,
    pub certificate_installed: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub uptime: Option<String>,
    pub error: Option<String>,
    /// Version of the last event folded into this row.
    pub version: i64,
}

impl GatewayRecord {
    /// Project a fully folded aggregate into a read-model row.
    pub fn from_aggregate(aggregate: &GatewayAggregate) -> Self {
        Self {
            gateway_id: aggregate.gateway_id.clone(),
            state: aggregate.state,
            health: HealthLabel::from_state(aggregate.state),
            name: aggregate.name.clone(),
            location: aggregate.location.clone(),
            certificate_installed: aggregate.has_certificate(),
            created_at: aggregate.created_at,
            connected_at: aggregate.connected_at,
            disconnected_at: aggregate.disconnected_at,
            deleted_at: aggregate.deleted_at,
            last_heartbeat: aggregate.last_heartbeat,
            last_updated: aggregate.last_updated,
            uptime: aggregate.uptime.clone(),
            error: aggregate.error.clone(),
            version: aggregate.version(),
        }
    }

    /// The most recent liveness signal for timeout evaluation.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat.max(self.last_updated)
    }
}

/// Read-model storage contract.
#[async_trait]
pub trait ReadModel: Send + Sync {
    /// Insert or replace a gateway row (last projection wins).
    async fn upsert(&self, record: GatewayRecord) -> Result<(), FleetError>;

    /// Fetch a single gateway row.
    async fn get(&self, gateway_id: &str) -> Result<Option<GatewayRecord>, FleetError>;

    /// List all gateway rows.
    async fn list(&self) -> Result<Vec<GatewayRecord>, FleetError>;
}

/// In-memory read model for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryReadModel {
    records: RwLock<HashMap<String, GatewayRecord>>,
}

impl MemoryReadModel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadModel for MemoryReadModel {
    async fn upsert(&self, record: GatewayRecord) -> Result<(), FleetError> {
        self.records
            .write()
            .expect("read model lock poisoned")
            .insert(record.gateway_id.clone(), record);
        Ok(())
    }

    async fn get(&self, gateway_id: &str) -> Result<Option<GatewayRecord>, FleetError> {
        Ok(self
            .records
            .read()
            .expect("read model lock poisoned")
            .get(gateway_id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<GatewayRecord>, FleetError> {
        let mut records: Vec<GatewayRecord> = self
            .records
            .read()
            .expect("read model lock poisoned")
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.gateway_id.cmp(&b.gateway_id));
        Ok(records)
    }
}
