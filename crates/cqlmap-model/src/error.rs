//! Error types for cqlmap-model

use thiserror::Error;

/// Errors raised while building keys, entities and queries
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Malformed query (e.g. a list value compared with `=`)
    #[error("invalid query: {0}")]
    Query(String),

    /// Key string or key parts that do not form a valid key
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Value does not match the declared field descriptor
    #[error("field {field} expects {expected}, got {found}")]
    FieldType {
        field: String,
        expected: String,
        found: String,
    },

    /// Field not declared in the entity schema
    #[error("unknown field: {0}")]
    UnknownField(String),
}

/// Result type for model operations
pub type ModelResult<T> = std::result::Result<T, ModelError>;
