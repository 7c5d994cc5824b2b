//! Pluggable child-record lookup.
//!
//! By default the fetcher finds the children of a row through the foreign
//! key resolved for the relation. A [`RecordProvider`] registered for an
//! exact `(owner, target, path)` triple replaces that lookup, e.g. to read
//! children from a view or to apply a filter.

use std::collections::HashMap;
use std::sync::Arc;

use aggregraph_core::{PersistError, PersistResult, Record, StorageError, TypeRegistry};

use crate::record_store::RecordSource;

/// Supplies the child records of `parent` for one relation.
pub trait RecordProvider: Send + Sync {
    fn provide_collection(
        &self,
        source: &dyn RecordSource,
        parent: &Record,
    ) -> Result<Vec<Record>, StorageError>;

    /// Singular lookup: the first record of the collection, if any.
    fn provide(
        &self,
        source: &dyn RecordSource,
        parent: &Record,
    ) -> Result<Option<Record>, StorageError> {
        Ok(self.provide_collection(source, parent)?.into_iter().next())
    }
}

/// Default provider: rows of `table` whose `column` holds the parent key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyLookup {
    pub table: String,
    pub column: String,
}

impl ForeignKeyLookup {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl RecordProvider for ForeignKeyLookup {
    fn provide_collection(
        &self,
        source: &dyn RecordSource,
        parent: &Record,
    ) -> Result<Vec<Record>, StorageError> {
        source.find_by(&self.table, &self.column, &parent.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProviderKey {
    owner: String,
    target: String,
    path: String,
}

impl ProviderKey {
    fn new(owner: &str, target: &str, path: &str) -> Self {
        Self {
            owner: owner.to_string(),
            target: target.to_string(),
            path: path.to_string(),
        }
    }
}

/// Custom providers keyed by `(owner type, target type, reference path)`.
///
/// `path` is a reference name for child entities and a dotted composition
/// path (e.g. `billing.location`) for value objects.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKey, Arc<dyn RecordProvider>>,
}

impl core::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut keys: Vec<String> = self
            .providers
            .keys()
            .map(|k| format!("{}.{} -> {}", k.owner, k.path, k.target))
            .collect();
        keys.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &keys)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for one declared relation.
    ///
    /// Fails with a configuration error unless `owner` declares a composed
    /// reference or a value-object composition named `path` targeting
    /// `target`.
    pub fn register(
        &mut self,
        types: &TypeRegistry,
        provider: Arc<dyn RecordProvider>,
        owner: &str,
        target: &str,
        path: &str,
    ) -> PersistResult<()> {
        let descriptor = types.get(owner)?;

        let declared = match descriptor.find_reference(path) {
            Some(reference) => reference.is_composition() && reference.target == target,
            None => descriptor
                .find_composition(path)
                .is_some_and(|c| c.target == target),
        };
        if !declared {
            return Err(PersistError::configuration(format!(
                "no owned relation '{owner}.{path}' targeting '{target}'"
            )));
        }

        tracing::debug!(owner, target, path, "record provider registered");
        self.providers
            .insert(ProviderKey::new(owner, target, path), provider);
        Ok(())
    }

    pub fn get(&self, owner: &str, target: &str, path: &str) -> Option<&Arc<dyn RecordProvider>> {
        self.providers.get(&ProviderKey::new(owner, target, path))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggregraph_core::Value;

    use crate::fixtures;
    use crate::record_store::{InMemoryRecordStore, RecordStore, RowOp};

    #[test]
    fn foreign_key_lookup_finds_children_by_parent_key() {
        let store = InMemoryRecordStore::new();
        store
            .apply(vec![
                RowOp::Insert(Record::new("OrderLine", 11).with("order_id", 1)),
                RowOp::Insert(Record::new("OrderLine", 10).with("order_id", 1)),
                RowOp::Insert(Record::new("OrderLine", 12).with("order_id", 2)),
            ])
            .unwrap();

        let lookup = ForeignKeyLookup::new("OrderLine", "order_id");
        let parent = Record::new("Order", 1);
        let children = lookup.provide_collection(&store, &parent).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(
            lookup.provide(&store, &parent).unwrap().map(|r| r.key),
            Some(Value::from(10))
        );
    }

    #[test]
    fn registration_requires_declared_relation() {
        let types = fixtures::order_types();
        let mut providers = ProviderRegistry::new();
        let lookup: Arc<dyn RecordProvider> = Arc::new(ForeignKeyLookup::new("OrderLine", "order_id"));

        providers
            .register(&types, lookup.clone(), "Order", "OrderLine", "lines")
            .unwrap();
        providers
            .register(&types, lookup.clone(), "Order", "Geo", "billing.location")
            .unwrap();
        assert_eq!(providers.len(), 2);
        assert!(providers.get("Order", "OrderLine", "lines").is_some());

        let wrong_target = providers.register(&types, lookup.clone(), "Order", "Shipment", "lines");
        assert!(matches!(wrong_target, Err(PersistError::Configuration(_))));

        let unknown_path = providers.register(&types, lookup.clone(), "Order", "OrderLine", "items");
        assert!(matches!(unknown_path, Err(PersistError::Configuration(_))));

        // Aggregate-root pointers are never fetched, so they take no provider.
        let pointer = providers.register(&types, lookup, "Order", "Warehouse", "warehouse");
        assert!(matches!(pointer, Err(PersistError::Configuration(_))));
    }
}
