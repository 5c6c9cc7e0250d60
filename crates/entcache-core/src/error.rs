//! Error taxonomy for cache operations.

use thiserror::Error;

use crate::cache::TransactionKind;
use crate::remote::RemoteError;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("An entity {entity} with the key {key} already exists in this cache")]
    DuplicateKey { entity: &'static str, key: String },

    #[error("Could not find entity {entity} with the key {key} in this cache")]
    NotFound { entity: &'static str, key: String },

    #[error("Key {given} does not match the key field value {field} of entity {entity}")]
    KeyMismatch {
        entity: &'static str,
        given: String,
        field: String,
    },

    #[error("Could not find field '{field}' on entity type {entity}")]
    UnknownField { entity: &'static str, field: String },

    #[error("Could not resolve surrogate key for entity type {entity}: {reason}")]
    KeyResolution { entity: &'static str, reason: String },

    #[error("Field '{field}' is registered more than once on entity type {entity}")]
    DuplicateField { entity: &'static str, field: String },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{kind} of entity with key {key} failed on the remote service")]
    Remote {
        kind: TransactionKind,
        key: String,
        #[source]
        source: RemoteError,
    },

    #[error("Failed to fetch entities from the remote service: {0}")]
    RemoteFetch(#[source] RemoteError),

    #[error(
        "Cache has pending changes ({added} added, {updated} updated, {deleted} deleted); \
         save them to the server or clear the cache first"
    )]
    PendingChanges {
        added: usize,
        updated: usize,
        deleted: usize,
    },

    #[error("Synchronization was cancelled")]
    Cancelled,

    #[error("File path not specified for entity cache")]
    NoFilePath,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl CacheError {
    /// True for errors caused by the remote service rather than local state.
    pub fn is_remote(&self) -> bool {
        matches!(self, CacheError::Remote { .. } | CacheError::RemoteFetch(_))
    }
}
