//! The append-only event log contract and its implementations.

mod memory;
mod postgres;

pub use memory::MemoryEventStore;
pub use postgres::{PgEventStore, PgReadModel};

use async_trait::async_trait;

use crate::error::FleetError;
use crate::event::{EventRecord, NewEvent};

/// Append-only log of domain events keyed by `(aggregate_id, version)`.
///
/// Implementations assign the next version (strictly increasing per
/// aggregate, starting at 0) and the timestamp at append time. Events are
/// never mutated or deleted.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event, returning the stored record with its assigned
    /// version.
    async fn append(&self, event: NewEvent) -> Result<EventRecord, FleetError>;

    /// Read the full history of an aggregate, ordered by version.
    /// An unknown aggregate yields an empty list.
    async fn read_all(&self, aggregate_id: &str) -> Result<Vec<EventRecord>, FleetError>;
}
