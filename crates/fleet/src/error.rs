use thiserror::Error;

/// Errors from the event store, projection, and monitor layers.
///
/// Note that *applying* a syntactically valid event to an aggregate never
/// fails — illegal transitions are logged no-ops. Errors here are
/// infrastructure: storage, serialization, missing aggregates.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("aggregate not found: {0}")]
    AggregateNotFound(String),

    #[error("event payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(String),
}
