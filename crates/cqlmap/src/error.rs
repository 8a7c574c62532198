//! Error types for cqlmap

use cqlmap_model::ModelError;
use thiserror::Error;

/// Failures reported by a [`crate::Transport`].
///
/// The repository passes these through unmodified; retry policy, if any,
/// belongs to the transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Could not reach the cluster
    #[error("connection failed: {0}")]
    Connection(String),

    /// Request exceeded the transport's timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Not enough replicas / coordinator unavailable
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Statement refused by the store (syntax, unknown table, ...)
    #[error("statement rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur in the repository layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed statement request (delete without filters, empty SET, ...)
    #[error("invalid query: {0}")]
    Query(String),

    /// A declared primary-key column could not be resolved from the entity
    #[error("missing mandatory PRIMARY KEY part {column:?}")]
    PrimaryKey { column: String },

    /// Entity kind has no registered storage binding
    #[error("kind {kind:?} has no storage binding")]
    ModelValidation { kind: String },

    /// Row lacks a column the codec requires
    #[error("row is missing required column {column:?}")]
    MissingColumn { column: String },

    /// `get` matched no row
    #[error("no row in {table} for key {key}")]
    NotFound { table: String, key: String },

    /// Conditional write reported `[applied] = false`
    #[error("lightweight transaction not applied: {0}")]
    OptimisticLock(String),

    /// Encoding or decoding a row failed
    #[error("codec error: {0}")]
    Codec(String),

    /// Table metadata could not be interpreted
    #[error("schema error: {0}")]
    Schema(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Entity-level failure (bad key, field type mismatch)
    #[error(transparent)]
    Model(ModelError),

    /// Store-level failure, passed through as reported
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<ModelError> for StoreError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Query(msg) => StoreError::Query(msg),
            other => StoreError::Model(other),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

/// Result type for cqlmap operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
