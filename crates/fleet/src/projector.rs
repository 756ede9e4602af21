//! Append-and-project pipeline.
//!
//! Every new domain event goes through here: append to the log, replay the
//! aggregate's full history (no snapshotting), and upsert the resulting
//! projection into the read model. The projection is refreshed after every
//! successful event application, so read-model rows never lag by more than
//! the in-flight append.

use std::sync::Arc;

use tracing::debug;

use crate::aggregate::GatewayAggregate;
use crate::error::FleetError;
use crate::event::NewEvent;
use crate::read_model::{GatewayRecord, ReadModel};
use crate::store::EventStore;

/// Binds an event store and a read model into the single write path.
pub struct Projector {
    store: Arc<dyn EventStore>,
    read_model: Arc<dyn ReadModel>,
}

impl Projector {
    pub fn new(store: Arc<dyn EventStore>, read_model: Arc<dyn ReadModel>) -> Self {
        Self { store, read_model }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn read_model(&self) -> &Arc<dyn ReadModel> {
        &self.read_model
    }

    /// Append one event and refresh the aggregate's projection.
    ///
    /// Returns the freshly folded aggregate.
    pub async fn append_and_project(&self, event: NewEvent) -> Result<GatewayAggregate, FleetError> {
        let record = self.store.append(event).await?;
        debug!(
            aggregate_id = %record.aggregate_id,
            event_type = %record.event_type,
            version = record.version,
            "event appended"
        );

        let aggregate = self.reconstruct(&record.aggregate_id).await?;
        self.read_model
            .upsert(GatewayRecord::from_aggregate(&aggregate))
            .await?;
        Ok(aggregate)
    }

    /// Replay an aggregate's full event history from scratch.
    pub async fn reconstruct(&self, aggregate_id: &str) -> Result<GatewayAggregate, FleetError> {
        let events = self.store.read_all(aggregate_id).await?;
        if events.is_empty() {
            return Err(FleetError::AggregateNotFound(aggregate_id.to_string()));
        }
        Ok(GatewayAggregate::replay(aggregate_id, &events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::GatewayState;
    use crate::event::{EventType, NewEvent};
    use crate::read_model::MemoryReadModel;
    use crate::store::MemoryEventStore;
    use serde_json::json;

    fn projector() -> (Projector, Arc<MemoryReadModel>) {
        let store = Arc::new(MemoryEventStore::new());
        let read_model = Arc::new(MemoryReadModel::new());
        (
            Projector::new(store, read_model.clone()),
            read_model,
        )
    }

    #[tokio::test]
    async fn projection_follows_every_event() {
        let (projector, read_model) = projector();

        projector
            .append_and_project(NewEvent::created("g1", "scale", "yard"))
            .await
            .unwrap();
        let row = read_model.get("g1").await.unwrap().unwrap();
        assert_eq!(row.state, GatewayState::Created);
        assert_eq!(row.version, 0);

        projector
            .append_and_project(NewEvent::new("g1", EventType::GatewayConnected, json!({})))
            .await
            .unwrap();
        let row = read_model.get("g1").await.unwrap().unwrap();
        assert_eq!(row.state, GatewayState::Connected);
        assert_eq!(row.version, 1);
    }

    #[tokio::test]
    async fn reconstruct_twice_is_identical() {
        let (projector, _) = projector();
        projector
            .append_and_project(NewEvent::created("g1", "scale", "yard"))
            .await
            .unwrap();
        projector
            .append_and_project(NewEvent::new("g1", EventType::GatewayConnected, json!({})))
            .await
            .unwrap();
        projector
            .append_and_project(NewEvent::heartbeat("g1", json!({ "uptime": 9 })))
            .await
            .unwrap();

        let a = projector.reconstruct("g1").await.unwrap();
        let b = projector.reconstruct("g1").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn reconstruct_unknown_aggregate_errors() {
        let (projector, _) = projector();
        match projector.reconstruct("nope").await {
            Err(FleetError::AggregateNotFound(id)) => assert_eq!(id, "nope"),
            other => panic!("expected AggregateNotFound, got {other:?}"),
        }
    }
}
