//! Flat, row-shaped counterparts of domain nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::Value;

/// Table-qualified row key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub table: String,
    pub key: Value,
}

impl RecordId {
    pub fn new(table: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}[{}]", self.table, self.key)
    }
}

/// One row: the unit exchanged with storage.
///
/// Entity rows are keyed by their identity value; value-object rows by a
/// generated key. Foreign-key columns link a row to its parent row's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub table: String,
    pub key: Value,
    pub columns: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(table: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    pub fn id(&self) -> RecordId {
        RecordId::new(self.table.clone(), self.key.clone())
    }

    /// Column value, with absent columns reading as `Null`.
    pub fn get(&self, column: &str) -> &Value {
        self.columns.get(column).unwrap_or(&Value::Null)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Integer column read as a version counter (absent or negative → 0).
    pub fn version(&self, column: &str) -> u64 {
        self.get(column)
            .as_int()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0)
    }

    /// Column-wise comparison ignoring `skip`; `Null` equals absent.
    pub fn same_columns(&self, other: &Record, skip: Option<&str>) -> bool {
        let relevant = |record: &Record| -> BTreeMap<String, Value> {
            record
                .columns
                .iter()
                .filter(|(k, v)| !v.is_null() && Some(k.as_str()) != skip)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        relevant(self) == relevant(other)
    }
}
