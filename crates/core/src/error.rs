//! Persistence error model.

use thiserror::Error;

/// Result type used across the persistence kernel.
pub type PersistResult<T> = Result<T, PersistError>;

/// Error raised by the row store collaborator.
///
/// These are propagated unmodified; the kernel never retries or compensates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A primary-key or unique-column constraint was violated.
    #[error("unique constraint violated on {table}.{column}: {value}")]
    UniqueViolation {
        table: String,
        column: String,
        value: String,
    },

    /// A foreign-key column points at a row that does not exist.
    #[error("foreign key violated on {table}.{column}: no {referenced} row {value}")]
    ForeignKeyViolation {
        table: String,
        column: String,
        referenced: String,
        value: String,
    },

    /// Optimistic concurrency check failed (stale version).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// An update or delete targeted a row that does not exist.
    #[error("row not found: {table} {key}")]
    MissingRow { table: String, key: String },

    /// The backend could not be reached or is in an unusable state.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Kernel-level error.
///
/// Every variant aborts the whole operation; there is no partial-success mode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// Invalid type-descriptor table or record-provider registration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// More than one foreign key could link `target` rows to an `owner` row.
    #[error("multiple candidate relations from {owner} to {target} via '{path}': {columns:?}")]
    MultipleCandidateRelations {
        owner: String,
        target: String,
        path: String,
        columns: Vec<String>,
    },

    /// The same identity appears in one graph with differing content.
    #[error("identity consistency violated: {0}")]
    Consistency(String),

    /// A record could not be turned into a domain node (or vice versa).
    #[error("mapping error: {0}")]
    Mapping(String),

    /// Raised by the row store.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Event delivery failed after a successful commit.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl PersistError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::Mapping(msg.into())
    }

    /// True for optimistic-version mismatches surfaced by the store.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Concurrency(_)))
    }
}
