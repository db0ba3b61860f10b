//! Error types for the persistence adapter.
//!
//! All operations surface [`PersistenceError`] via [`PersistenceResult`].
//! Driver-level failures during connect, schema check, or query are wrapped
//! with the operation and table they occurred in. The adapter makes no
//! distinction between transient and fatal causes and never retries.

use thiserror::Error;

/// Alias for `Result<T, PersistenceError>`.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Errors that can occur in the persistence adapter.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Establishing or checking a database connection failed.
    #[error("could not initialize {strategy} database connection: {reason}")]
    Connection {
        /// Which connection strategy failed (`client` or `pool`).
        strategy: &'static str,
        reason: String,
    },

    /// The table-exists check or the table creation statement failed.
    #[error("could not verify schema for table ({table}): {reason}")]
    Schema { table: String, reason: String },

    /// A read, save, or delete statement failed.
    #[error("could not {operation} item ({partition_key}) in table ({table}): {reason}")]
    Query {
        operation: &'static str,
        partition_key: String,
        table: String,
        reason: String,
    },

    /// A statement failed at the driver, outside any adapter operation.
    #[error("database error: {0}")]
    Database(String),

    /// The request envelope is missing the field the partition key derives from.
    #[error("cannot retrieve {field} from request envelope")]
    PartitionKey { field: &'static str },

    /// A statement parameter could not be bound.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid adapter or connection configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
