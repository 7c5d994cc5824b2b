//! Optimistic concurrency primitives for aggregate roots.

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Optimistic concurrency expectation for a versioned row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// Require the row to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> Result<(), StorageError> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(StorageError::Concurrency(format!(
                "expected: {self:?}, actual: {actual}"
            )))
        }
    }
}

/// Compare-and-swap guard attached to a row update or delete.
///
/// The store reads `column` from the current row and rejects the mutation
/// unless it satisfies `expected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionGuard {
    pub column: String,
    pub expected: ExpectedVersion,
}

impl VersionGuard {
    pub fn exact(column: impl Into<String>, version: u64) -> Self {
        Self {
            column: column.into(),
            expected: ExpectedVersion::Exact(version),
        }
    }
}

/// Next version after a successful write.
pub fn next_version(current: u64) -> u64 {
    current.saturating_add(1)
}
