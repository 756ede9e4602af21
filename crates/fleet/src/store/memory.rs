use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::FleetError;
use crate::event::{AGGREGATE_TYPE_GATEWAY, EventRecord, NewEvent};

use super::EventStore;

/// In-memory event store for tests and single-process deployments.
///
/// Version assignment happens under the write lock, so appends to the same
/// aggregate are serialized and the per-aggregate version sequence has no
/// gaps.
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<String, Vec<EventRecord>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across all aggregates.
    pub fn len(&self) -> usize {
        self.events
            .read()
            .expect("event store lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All aggregate ids with at least one event.
    pub fn aggregate_ids(&self) -> Vec<String> {
        self.events
            .read()
            .expect("event store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: NewEvent) -> Result<EventRecord, FleetError> {
        let mut events = self.events.write().expect("event store lock poisoned");
        let log = events.entry(event.aggregate_id.clone()).or_default();
        let version = log.last().map(|e| e.version + 1).unwrap_or(0);

        let record = EventRecord {
            aggregate_id: event.aggregate_id,
            aggregate_type: AGGREGATE_TYPE_GATEWAY.to_string(),
            event_type: event.event_type,
            event_data: event.event_data,
            version,
            timestamp: Utc::now(),
        };
        log.push(record.clone());
        Ok(record)
    }

    async fn read_all(&self, aggregate_id: &str) -> Result<Vec<EventRecord>, FleetError> {
        let events = self.events.read().expect("event store lock poisoned");
        Ok(events.get(aggregate_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use serde_json::json;

    #[tokio::test]
    async fn versions_start_at_zero_and_increase() {
        let store = MemoryEventStore::new();

        let first = store
            .append(NewEvent::created("g1", "scale", "yard"))
            .await
            .unwrap();
        assert_eq!(first.version, 0);

        let second = store
            .append(NewEvent::new("g1", EventType::GatewayConnected, json!({})))
            .await
            .unwrap();
        assert_eq!(second.version, 1);

        // A different aggregate gets its own sequence.
        let other = store
            .append(NewEvent::created("g2", "scale", "yard"))
            .await
            .unwrap();
        assert_eq!(other.version, 0);
    }

    #[tokio::test]
    async fn read_all_returns_version_order() {
        let store = MemoryEventStore::new();
        for _ in 0..3 {
            store
                .append(NewEvent::new("g1", EventType::GatewayUpdated, json!({})))
                .await
                .unwrap();
        }
        let events = store.read_all("g1").await.unwrap();
        let versions: Vec<i64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn unknown_aggregate_reads_empty() {
        let store = MemoryEventStore::new();
        assert!(store.read_all("missing").await.unwrap().is_empty());
    }
}
