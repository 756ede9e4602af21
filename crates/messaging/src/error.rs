use thiserror::Error;

/// Errors that can occur in the ponder messaging layer.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("envelope encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("envelope decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("payload JSON error: {0}")]
    PayloadJson(#[from] serde_json::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("gave up after {attempts} connection attempts: {last_error}")]
    BackoffExhausted { attempts: u32, last_error: String },
}
