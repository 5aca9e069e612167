use thiserror::Error;

/// Pipeline-wide error types for Grapevine.
#[derive(Debug, Error)]
pub enum GrapevineError {
    /// Invalid or missing configuration (root pubkey, rating curve, ranges).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A rater shard could not be parsed or has the wrong structure.
    #[error("Malformed shard for rater {rater}: {reason}")]
    MalformedShard { rater: String, reason: String },

    /// Output sink failure (delta stream, scorecard store, run metadata).
    #[error("Sink error: {0}")]
    Sink(String),

    /// Snapshot or scorecard storage could not be read.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network transport error (connect, send, receive).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Explicit protocol-level rejection by a relay endpoint.
    #[error("Rejected by {endpoint}: {reason}")]
    Rejected { endpoint: String, reason: String },

    /// Work stopped because the shutdown signal fired.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl From<serde_json::Error> for GrapevineError {
    fn from(e: serde_json::Error) -> Self {
        GrapevineError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for GrapevineError {
    fn from(e: std::io::Error) -> Self {
        GrapevineError::Storage(e.to_string())
    }
}
