use std::sync::Arc;

use serde::{Deserialize, Serialize};

use aggregraph_core::{Record, RecordId, StorageError, Value, VersionGuard};

/// Read side of the row store.
///
/// Implementations must return `find_by` results sorted by row key so that
/// traversal order (and therefore event order) is deterministic.
pub trait RecordSource: Send + Sync {
    fn get(&self, table: &str, key: &Value) -> Result<Option<Record>, StorageError>;

    /// Rows of `table` whose `column` equals `value`, ordered by key.
    fn find_by(&self, table: &str, column: &str, value: &Value)
    -> Result<Vec<Record>, StorageError>;
}

/// One row-level mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowOp {
    Insert(Record),
    /// Replace the row's columns; `guard` is checked against the current row.
    Update {
        record: Record,
        guard: Option<VersionGuard>,
    },
    Delete {
        id: RecordId,
        guard: Option<VersionGuard>,
    },
}

impl RowOp {
    pub fn id(&self) -> RecordId {
        match self {
            RowOp::Insert(record) | RowOp::Update { record, .. } => record.id(),
            RowOp::Delete { id, .. } => id.clone(),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            RowOp::Insert(_) => "insert",
            RowOp::Update { .. } => "update",
            RowOp::Delete { .. } => "delete",
        }
    }
}

/// Transactional row store.
///
/// `apply` is the transaction boundary: either every operation of the batch
/// takes effect or none does. Constraint and version failures are reported
/// as [`StorageError`] and leave the store untouched.
pub trait RecordStore: RecordSource {
    fn apply(&self, batch: Vec<RowOp>) -> Result<(), StorageError>;
}

impl<S> RecordSource for Arc<S>
where
    S: RecordSource + ?Sized,
{
    fn get(&self, table: &str, key: &Value) -> Result<Option<Record>, StorageError> {
        (**self).get(table, key)
    }

    fn find_by(
        &self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> Result<Vec<Record>, StorageError> {
        (**self).find_by(table, column, value)
    }
}

impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    fn apply(&self, batch: Vec<RowOp>) -> Result<(), StorageError> {
        (**self).apply(batch)
    }
}
