//! Error types for key insertion and federation sync bookkeeping.

use thiserror::Error;

/// Errors reported by a persistence collaborator.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Batch rejected: {0}")]
    Rejected(String),
}

/// Errors reported by a federation gateway collaborator.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway {gateway} unreachable: {reason}")]
    Unreachable { gateway: String, reason: String },

    #[error("Batch {batch_tag} not available: {reason}")]
    BatchUnavailable { batch_tag: String, reason: String },
}

/// Errors that abort an insertion or sync job.
#[derive(Debug, Error)]
pub enum InsertionError {
    /// One origin group could not be stored. Groups persisted before it stay
    /// persisted.
    #[error("Persisting keys for origin {origin} failed: {source}")]
    Persistence {
        origin: String,
        #[source]
        source: PersistenceError,
    },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Sync log entry {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: u64,
        from: &'static str,
        to: &'static str,
    },

    #[error("Unknown sync log entry {0}")]
    UnknownSyncEntry(u64),
}
