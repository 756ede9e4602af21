//! Heartbeat timeout monitor.
//!
//! A periodic job that scans the read model for connected gateways,
//! reconstructs each candidate's aggregate from the event log (full
//! replay, no snapshots), and synthesizes a disconnect event for any
//! gateway whose last liveness signal is older than the threshold.
//! The monitor is the only writer of new events besides the backend API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use ponder_core::config::TimeoutSettings;

use crate::aggregate::GatewayState;
use crate::error::FleetError;
use crate::event::NewEvent;
use crate::projector::Projector;
use crate::read_model::GatewayRecord;

/// Invoked after a timeout-driven disconnect has been appended and
/// projected, so other components can react (notifications, dashboards).
pub type DisconnectCallback = Arc<dyn Fn(&GatewayRecord) + Send + Sync>;

pub struct TimeoutMonitor {
    projector: Arc<Projector>,
    settings: TimeoutSettings,
    callback: Option<DisconnectCallback>,
}

impl TimeoutMonitor {
    pub fn new(projector: Arc<Projector>, settings: TimeoutSettings) -> Self {
        Self {
            projector,
            settings,
            callback: None,
        }
    }

    /// Register a callback fired once per synthesized disconnect.
    pub fn on_disconnect(mut self, callback: DisconnectCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Run the poll loop until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.settings.poll_interval_secs));
        info!(
            poll_interval_secs = self.settings.poll_interval_secs,
            heartbeat_timeout_secs = self.settings.heartbeat_timeout_secs,
            "timeout monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once(Utc::now()).await {
                        warn!(error = %e, "timeout scan failed");
                    }
                }
                _ = shutdown.notified() => {
                    info!("timeout monitor stopped");
                    break;
                }
            }
        }
    }

    /// One full scan cycle. Returns the ids of gateways disconnected this
    /// cycle.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<Vec<String>, FleetError> {
        let records = self.projector.read_model().list().await?;
        let mut disconnected = Vec::new();

        for record in records {
            if !Self::eligible(&record) {
                continue;
            }

            // The read model is a cache; the event log is the truth.
            // Re-derive the aggregate before deciding anything.
            let aggregate = self.projector.reconstruct(&record.gateway_id).await?;
            if aggregate.state != GatewayState::Connected {
                debug!(
                    gateway_id = %record.gateway_id,
                    "read model lagged behind event log, skipping"
                );
                continue;
            }

            // Status reports refresh last_updated without touching the
            // heartbeat timestamp; the freshest of the two signals decides.
            let last_seen = match aggregate.last_seen() {
                Some(ts) => ts,
                None => continue,
            };

            let silence = now.signed_duration_since(last_seen);
            if silence.num_seconds() < self.settings.heartbeat_timeout_secs as i64 {
                continue;
            }

            info!(
                gateway_id = %record.gateway_id,
                silence_secs = silence.num_seconds(),
                "heartbeat timeout, synthesizing disconnect"
            );

            let updated = self
                .projector
                .append_and_project(NewEvent::disconnected(
                    &record.gateway_id,
                    "heartbeat timeout",
                    now,
                ))
                .await?;

            let projected = GatewayRecord::from_aggregate(&updated);
            if let Some(callback) = &self.callback {
                callback(&projected);
            }
            disconnected.push(record.gateway_id);
        }

        Ok(disconnected)
    }

    /// Timeout eligibility gate.
    ///
    /// The read model carries two vocabularies: the lifecycle state enum
    /// and the operator-facing health label. The gate is on *state* —
    /// only Connected gateways can time out. Terminal (Deleted) and
    /// already-Disconnected gateways are skipped no matter what their
    /// health label says.
    fn eligible(record: &GatewayRecord) -> bool {
        record.state == GatewayState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, NewEvent};
    use crate::read_model::{HealthLabel, MemoryReadModel, ReadModel};
    use crate::store::MemoryEventStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn projector() -> Arc<Projector> {
        Arc::new(Projector::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryReadModel::new()),
        ))
    }

    fn settings(timeout_secs: u64) -> TimeoutSettings {
        TimeoutSettings {
            poll_interval_secs: 1,
            heartbeat_timeout_secs: timeout_secs,
        }
    }

    async fn connect_gateway(projector: &Projector, id: &str) {
        projector
            .append_and_project(NewEvent::created(id, "scale", "yard"))
            .await
            .unwrap();
        projector
            .append_and_project(NewEvent::status_report(
                id,
                json!({ "certificate_status": { "status": "installed" }, "status": "online" }),
            ))
            .await
            .unwrap();
        projector
            .append_and_project(NewEvent::heartbeat(id, json!({ "uptime": 1 })))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn silent_gateway_is_disconnected_with_error() {
        let projector = projector();
        connect_gateway(&projector, "g1").await;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_callback = fired.clone();
        let monitor = TimeoutMonitor::new(projector.clone(), settings(60)).on_disconnect(
            Arc::new(move |record| {
                assert_eq!(record.state, GatewayState::Disconnected);
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // Pretend an hour has passed since the last heartbeat.
        let later = Utc::now() + chrono::Duration::hours(1);
        let disconnected = monitor.scan_once(later).await.unwrap();
        assert_eq!(disconnected, vec!["g1".to_string()]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let row = projector.read_model().get("g1").await.unwrap().unwrap();
        assert_eq!(row.state, GatewayState::Disconnected);
        let error = row.error.expect("disconnect must set the error field");
        assert!(error.starts_with("heartbeat timeout at "), "got: {error}");
    }

    #[tokio::test]
    async fn fresh_gateway_is_left_alone() {
        let projector = projector();
        connect_gateway(&projector, "g1").await;

        let monitor = TimeoutMonitor::new(projector.clone(), settings(3600));
        let disconnected = monitor.scan_once(Utc::now()).await.unwrap();
        assert!(disconnected.is_empty());

        let row = projector.read_model().get("g1").await.unwrap().unwrap();
        assert_eq!(row.state, GatewayState::Connected);
    }

    #[tokio::test]
    async fn fresh_status_report_counts_as_liveness() {
        let projector = projector();
        connect_gateway(&projector, "g1").await;

        // A status report lands after the last heartbeat.
        tokio::time::sleep(Duration::from_millis(5)).await;
        projector
            .append_and_project(NewEvent::status_report("g1", json!({ "health": "good" })))
            .await
            .unwrap();

        let row = projector.read_model().get("g1").await.unwrap().unwrap();
        let heartbeat_at = row.last_heartbeat.unwrap();

        // Scan exactly at the heartbeat's threshold: the heartbeat alone
        // is stale, but the fresher status report keeps the gateway up.
        let monitor = TimeoutMonitor::new(projector.clone(), settings(3600));
        let at_threshold = heartbeat_at + chrono::Duration::seconds(3600);
        assert!(monitor.scan_once(at_threshold).await.unwrap().is_empty());

        let row = projector.read_model().get("g1").await.unwrap().unwrap();
        assert_eq!(row.state, GatewayState::Connected);
    }

    #[tokio::test]
    async fn eligibility_uses_state_not_health_label() {
        // Pin the two-vocabulary mapping: a row whose health label claims
        // Healthy but whose state is Disconnected must not be scanned,
        // and a Connected row is scanned regardless of label.
        let projector = projector();
        connect_gateway(&projector, "g1").await;

        let mut row = projector.read_model().get("g1").await.unwrap().unwrap();
        assert!(TimeoutMonitor::eligible(&row));

        row.state = GatewayState::Disconnected;
        row.health = HealthLabel::Healthy;
        assert!(!TimeoutMonitor::eligible(&row));

        row.state = GatewayState::Connected;
        row.health = HealthLabel::Stale;
        assert!(TimeoutMonitor::eligible(&row));

        row.state = GatewayState::Deleted;
        assert!(!TimeoutMonitor::eligible(&row));
    }

    #[tokio::test]
    async fn created_but_never_connected_does_not_time_out() {
        let projector = projector();
        projector
            .append_and_project(NewEvent::created("g2", "scale", "yard"))
            .await
            .unwrap();

        let monitor = TimeoutMonitor::new(projector.clone(), settings(0));
        let later = Utc::now() + chrono::Duration::hours(1);
        assert!(monitor.scan_once(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_scenario_create_connect_timeout() {
        // create (Created) -> connect with certificate (Connected) ->
        // heartbeat -> silence beyond threshold -> monitor emits
        // disconnect -> Disconnected with error set.
        let projector = projector();
        projector
            .append_and_project(NewEvent::created("g1", "scale house 1", "pier 4"))
            .await
            .unwrap();
        let row = projector.read_model().get("g1").await.unwrap().unwrap();
        assert_eq!(row.state, GatewayState::Created);

        projector
            .append_and_project(NewEvent::status_report(
                "g1",
                json!({ "certificate_status": { "status": "installed" }, "status": "online" }),
            ))
            .await
            .unwrap();
        let row = projector.read_model().get("g1").await.unwrap().unwrap();
        assert_eq!(row.state, GatewayState::Connected);

        projector
            .append_and_project(NewEvent::heartbeat("g1", json!({ "uptime": 30 })))
            .await
            .unwrap();

        let monitor = TimeoutMonitor::new(projector.clone(), settings(120));
        let later = Utc::now() + chrono::Duration::seconds(121);
        let disconnected = monitor.scan_once(later).await.unwrap();
        assert_eq!(disconnected, vec!["g1".to_string()]);

        let row = projector.read_model().get("g1").await.unwrap().unwrap();
        assert_eq!(row.state, GatewayState::Disconnected);
        assert!(row.error.is_some());

        // A second scan at the same instant finds nothing eligible.
        assert!(monitor.scan_once(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_gateway_is_never_scanned() {
        let projector = projector();
        connect_gateway(&projector, "g1").await;
        projector
            .append_and_project(NewEvent::new("g1", EventType::GatewayDeleted, json!({})))
            .await
            .unwrap();

        let monitor = TimeoutMonitor::new(projector.clone(), settings(0));
        let later = Utc::now() + chrono::Duration::hours(1);
        assert!(monitor.scan_once(later).await.unwrap().is_empty());
    }
}
