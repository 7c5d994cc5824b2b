use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use aggregraph_core::{Record, StorageError, TypeRegistry, Value, VersionGuard};

use super::r#trait::{RecordSource, RecordStore, RowOp};

/// Constraints of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub unique: Vec<String>,
    /// `(column, referenced table)` pairs.
    pub foreign_keys: Vec<(String, String)>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn unique(mut self, column: impl Into<String>) -> Self {
        self.unique.push(column.into());
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>, table: impl Into<String>) -> Self {
        self.foreign_keys.push((column.into(), table.into()));
        self
    }

    /// One schema per registered type, with foreign keys pointing at tables.
    pub fn from_registry(registry: &TypeRegistry) -> Vec<TableSchema> {
        registry
            .types()
            .map(|descriptor| {
                let mut schema = TableSchema::new(descriptor.table.clone());
                schema.unique = descriptor.unique.clone();
                for fk in &descriptor.foreign_keys {
                    let table = registry
                        .get(&fk.references)
                        .map(|d| d.table.clone())
                        .unwrap_or_else(|_| fk.references.clone());
                    schema.foreign_keys.push((fk.column.clone(), table));
                }
                schema
            })
            .collect()
    }
}

type Table = BTreeMap<Value, Record>;

/// In-memory transactional row store.
///
/// Intended for tests/dev. Each `apply` works on a private copy of the
/// tables and swaps it in only when every operation and every deferred
/// foreign-key check succeeded.
///
/// - Primary-key and unique constraints are checked per operation
/// - Version guards are compared against the row as staged so far
/// - Foreign keys are checked once, at commit
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    schema: HashMap<String, TableSchema>,
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryRecordStore {
    /// A store enforcing primary keys only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            schema: schemas
                .into_iter()
                .map(|s| (s.table.clone(), s))
                .collect(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// A store enforcing the constraints declared in `registry`.
    pub fn for_registry(registry: &TypeRegistry) -> Self {
        Self::with_schema(TableSchema::from_registry(registry))
    }

    /// All rows of `table`, ordered by key.
    pub fn rows(&self, table: &str) -> Result<Vec<Record>, StorageError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Number of rows across every table.
    pub fn row_count(&self) -> Result<usize, StorageError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.values().map(BTreeMap::len).sum())
    }

    fn stage(&self, tables: &mut HashMap<String, Table>, op: RowOp) -> Result<(), StorageError> {
        match op {
            RowOp::Insert(record) => {
                let rows = tables.entry(record.table.clone()).or_default();
                if rows.contains_key(&record.key) {
                    return Err(StorageError::UniqueViolation {
                        table: record.table.clone(),
                        column: "<primary key>".to_string(),
                        value: record.key.to_string(),
                    });
                }
                self.check_unique(rows, &record)?;
                rows.insert(record.key.clone(), record);
            }
            RowOp::Update { record, guard } => {
                let rows = tables.entry(record.table.clone()).or_default();
                let current = rows.get(&record.key).ok_or_else(|| StorageError::MissingRow {
                    table: record.table.clone(),
                    key: record.key.to_string(),
                })?;
                check_guard(guard.as_ref(), current)?;
                self.check_unique(rows, &record)?;
                rows.insert(record.key.clone(), record);
            }
            RowOp::Delete { id, guard } => {
                let current = tables
                    .get(&id.table)
                    .and_then(|rows| rows.get(&id.key))
                    .ok_or_else(|| StorageError::MissingRow {
                        table: id.table.clone(),
                        key: id.key.to_string(),
                    })?;
                check_guard(guard.as_ref(), current)?;
                if let Some(rows) = tables.get_mut(&id.table) {
                    rows.remove(&id.key);
                }
            }
        }
        Ok(())
    }

    fn check_unique(&self, rows: &Table, record: &Record) -> Result<(), StorageError> {
        let Some(schema) = self.schema.get(&record.table) else {
            return Ok(());
        };
        for column in &schema.unique {
            let value = record.get(column);
            if value.is_null() {
                continue;
            }
            let clash = rows
                .values()
                .any(|other| other.key != record.key && other.get(column) == value);
            if clash {
                return Err(StorageError::UniqueViolation {
                    table: record.table.clone(),
                    column: column.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_foreign_keys(&self, tables: &HashMap<String, Table>) -> Result<(), StorageError> {
        for schema in self.schema.values() {
            let Some(rows) = tables.get(&schema.table) else {
                continue;
            };
            for (column, referenced) in &schema.foreign_keys {
                for record in rows.values() {
                    let value = record.get(column);
                    if value.is_null() {
                        continue;
                    }
                    let exists = tables
                        .get(referenced)
                        .is_some_and(|parents| parents.contains_key(value));
                    if !exists {
                        return Err(StorageError::ForeignKeyViolation {
                            table: schema.table.clone(),
                            column: column.clone(),
                            referenced: referenced.clone(),
                            value: value.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("record store lock poisoned".to_string())
}

fn check_guard(guard: Option<&VersionGuard>, current: &Record) -> Result<(), StorageError> {
    match guard {
        Some(guard) => guard.expected.check(current.version(&guard.column)),
        None => Ok(()),
    }
}

impl RecordSource for InMemoryRecordStore {
    fn get(&self, table: &str, key: &Value) -> Result<Option<Record>, StorageError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    fn find_by(
        &self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> Result<Vec<Record>, StorageError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|r| r.get(column) == value)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl RecordStore for InMemoryRecordStore {
    fn apply(&self, batch: Vec<RowOp>) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let mut staged = tables.clone();
        for op in batch {
            self.stage(&mut staged, op)?;
        }
        self.check_foreign_keys(&staged)?;

        *tables = staged;
        Ok(())
    }
}
