use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::aggregate::GatewayState;
use crate::error::FleetError;
use crate::event::{AGGREGATE_TYPE_GATEWAY, EventRecord, EventType, NewEvent};
use crate::read_model::{GatewayRecord, HealthLabel, ReadModel};

use super::EventStore;

/// PostgreSQL-backed event store.
///
/// Version assignment runs inside a transaction per append: the next
/// version is computed from the current maximum for the aggregate, and the
/// `UNIQUE (aggregate_id, version)` constraint rejects a concurrent writer
/// that raced us to the same slot.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the events table and its indexes if they do not exist.
    pub async fn initialize_schema(&self) -> Result<(), FleetError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gateway_events (
                aggregate_id VARCHAR(200) NOT NULL,
                aggregate_type VARCHAR(50) NOT NULL,
                event_type VARCHAR(50) NOT NULL,
                event_data JSONB NOT NULL,
                version BIGINT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,

                CONSTRAINT unique_aggregate_version UNIQUE (aggregate_id, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_gateway_events_aggregate
             ON gateway_events (aggregate_id, version)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, event: NewEvent) -> Result<EventRecord, FleetError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query("SELECT MAX(version) FROM gateway_events WHERE aggregate_id = $1")
                .bind(&event.aggregate_id)
                .fetch_one(&mut *tx)
                .await?
                .get(0);
        let version = current.map(|v| v + 1).unwrap_or(0);
        let timestamp = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO gateway_events
                (aggregate_id, aggregate_type, event_type, event_data, version, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(AGGREGATE_TYPE_GATEWAY)
        .bind(event.event_type.to_string())
        .bind(&event.event_data)
        .bind(version)
        .bind(timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(EventRecord {
            aggregate_id: event.aggregate_id,
            aggregate_type: AGGREGATE_TYPE_GATEWAY.to_string(),
            event_type: event.event_type,
            event_data: event.event_data,
            version,
            timestamp,
        })
    }

    async fn read_all(&self, aggregate_id: &str) -> Result<Vec<EventRecord>, FleetError> {
        let rows = sqlx::query(
            "SELECT aggregate_id, aggregate_type, event_type, event_data, version, timestamp
             FROM gateway_events
             WHERE aggregate_id = $1
             ORDER BY version ASC",
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let event_type_str: String = row.get("event_type");
            let event_type: EventType = event_type_str
                .parse()
                .map_err(FleetError::Storage)?;
            let timestamp: DateTime<Utc> = row.get("timestamp");

            events.push(EventRecord {
                aggregate_id: row.get("aggregate_id"),
                aggregate_type: row.get("aggregate_type"),
                event_type,
                event_data: row.get("event_data"),
                version: row.get("version"),
                timestamp,
            });
        }
        Ok(events)
    }
}

/// PostgreSQL-backed read model: one row per gateway, replaced on every
/// projection.
pub struct PgReadModel {
    pool: PgPool,
}

impl PgReadModel {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the gateways table if it does not exist.
    pub async fn initialize_schema(&self) -> Result<(), FleetError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gateways (
                gateway_id VARCHAR(200) PRIMARY KEY,
                state VARCHAR(20) NOT NULL,
                health VARCHAR(20) NOT NULL,
                name VARCHAR(200),
                location VARCHAR(200),
                certificate_installed BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ,
                connected_at TIMESTAMPTZ,
                disconnected_at TIMESTAMPTZ,
                deleted_at TIMESTAMPTZ,
                last_heartbeat TIMESTAMPTZ,
                last_updated TIMESTAMPTZ,
                uptime VARCHAR(100),
                error TEXT,
                version BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn state_to_str(state: GatewayState) -> &'static str {
    match state {
        GatewayState::Created => "created",
        GatewayState::Connected => "connected",
        GatewayState::Disconnected => "disconnected",
        GatewayState::Deleted => "deleted",
    }
}

fn state_from_str(s: &str) -> Result<GatewayState, FleetError> {
    match s {
        "created" => Ok(GatewayState::Created),
        "connected" => Ok(GatewayState::Connected),
        "disconnected" => Ok(GatewayState::Disconnected),
        "deleted" => Ok(GatewayState::Deleted),
        other => Err(FleetError::Storage(format!("unknown gateway state: {other}"))),
    }
}

fn health_to_str(health: HealthLabel) -> &'static str {
    match health {
        HealthLabel::Healthy => "healthy",
        HealthLabel::Stale => "stale",
        HealthLabel::Unknown => "unknown",
    }
}

fn health_from_str(s: &str) -> Result<HealthLabel, FleetError> {
    match s {
        "healthy" => Ok(HealthLabel::Healthy),
        "stale" => Ok(HealthLabel::Stale),
        "unknown" => Ok(HealthLabel::Unknown),
        other => Err(FleetError::Storage(format!("unknown health label: {other}"))),
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<GatewayRecord, FleetError> {
    let state_str: String = row.get("state");
    let health_str: String = row.get("health");
    Ok(GatewayRecord {
        gateway_id: row.get("gateway_id"),
        state: state_from_str(&state_str)?,
        health: health_from_str(&health_str)?,
        name: row.get("name"),
        location: row.get("location"),
        certificate_installed: row.get("certificate_installed"),
        created_at: row.get("created_at"),
        connected_at: row.get("connected_at"),
        disconnected_at: row.get("disconnected_at"),
        deleted_at: row.get("deleted_at"),
        last_heartbeat: row.get("last_heartbeat"),
        last_updated: row.get("last_updated"),
        uptime: row.get("uptime"),
        error: row.get("error"),
        version: row.get("version"),
    })
}

#[async_trait]
impl ReadModel for PgReadModel {
    async fn upsert(&self, record: GatewayRecord) -> Result<(), FleetError> {
        sqlx::query(
            r#"
            INSERT INTO gateways
                (gateway_id, state, health, name, location, certificate_installed,
                 created_at, connected_at, disconnected_at, deleted_at,
                 last_heartbeat, last_updated, uptime, error, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (gateway_id) DO UPDATE SET
                state = EXCLUDED.state,
                health = EXCLUDED.health,
                name = EXCLUDED.name,
                location = EXCLUDED.location,
                certificate_installed = EXCLUDED.certificate_installed,
                created_at = EXCLUDED.created_at,
                connected_at = EXCLUDED.connected_at,
                disconnected_at = EXCLUDED.disconnected_at,
                deleted_at = EXCLUDED.deleted_at,
                last_heartbeat = EXCLUDED.last_heartbeat,
                last_updated = EXCLUDED.last_updated,
                uptime = EXCLUDED.uptime,
                error = EXCLUDED.error,
                version = EXCLUDED.version
            "#,
        )
        .bind(&record.gateway_id)
        .bind(state_to_str(record.state))
        .bind(health_to_str(record.health))
        .bind(&record.name)
        .bind(&record.location)
        .bind(record.certificate_installed)
        .bind(record.created_at)
        .bind(record.connected_at)
        .bind(record.disconnected_at)
        .bind(record.deleted_at)
        .bind(record.last_heartbeat)
        .bind(record.last_updated)
        .bind(&record.uptime)
        .bind(&record.error)
        .bind(record.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, gateway_id: &str) -> Result<Option<GatewayRecord>, FleetError> {
        let row = sqlx::query("SELECT * FROM gateways WHERE gateway_id = $1")
            .bind(gateway_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<GatewayRecord>, FleetError> {
        let rows = sqlx::query("SELECT * FROM gateways ORDER BY gateway_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }
}
