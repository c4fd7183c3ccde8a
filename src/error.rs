//! Error taxonomy for the arena.
//!
//! Only `ProviderError` is ever surfaced to spectators (as an `error`
//! broadcast event). Storage and brain failures are logged and swallowed:
//! scheduler correctness does not depend on durable writes succeeding.

use thiserror::Error;

/// Failure of a chat completion call against a provider backend.
///
/// Providers never retry internally; the battle loop decides what happens
/// next (it stops scheduling and waits for an explicit resume).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("{provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    /// The backend answered with a non-success status.
    #[error("{provider} returned HTTP {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    /// The response body could not be decoded into the expected shape.
    #[error("{provider} response could not be parsed: {reason}")]
    InvalidResponse { provider: String, reason: String },

    /// The provider requires an API key and none was configured.
    #[error("{provider} API key is not configured")]
    MissingApiKey { provider: String },
}

/// Failure talking to the relational store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("battle {0} not found")]
    BattleNotFound(uuid::Uuid),
}

impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        DatabaseError::Pool(e.to_string())
    }
}

/// Failure reading or writing a brain document on disk.
///
/// A load failure always degrades to an empty brain; a save failure is
/// reported and ignored.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("brain I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("brain document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Invalid or missing configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}
