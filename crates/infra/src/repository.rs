//! Aggregate repository (application-facing entry point).
//!
//! `AggregateRepository` composes a [`RecordStore`] and an [`EventBus`] behind
//! the five whole-aggregate operations:
//!
//! ```text
//! fetch_deep / fetch_deep_record / find_result_by_id   → GraphFetcher
//! insert / update / delete_by_id                       → Persister
//!                                                         ↓
//!                                           RecordStore::apply (atomic)
//!                                                         ↓
//!                                           EventBus::publish (post-commit)
//! ```
//!
//! The repository owns nothing but configuration; fetchers and persisters are
//! cheap borrowed views built per call.

use std::sync::Arc;

use tracing::debug;

use aggregraph_core::{
    AggregateGraph, DescriptorKind, Identity, PersistError, PersistResult, Record, TypeRegistry,
};
use aggregraph_events::{EventBus, LifecycleEvent};

use crate::config::RepositoryConfig;
use crate::fetcher::{FetchResult, GraphFetcher};
use crate::persister::Persister;
use crate::provider::{ProviderRegistry, RecordProvider};
use crate::record_store::RecordStore;

/// Repository for aggregates of one root type.
pub struct AggregateRepository<S, B> {
    types: Arc<TypeRegistry>,
    store: S,
    bus: B,
    root_type: String,
    providers: ProviderRegistry,
    config: RepositoryConfig,
}

impl<S, B> AggregateRepository<S, B>
where
    S: RecordStore,
    B: EventBus<LifecycleEvent>,
{
    /// Fails with a configuration error unless `root_type` is a registered
    /// aggregate root.
    pub fn new(
        types: Arc<TypeRegistry>,
        store: S,
        bus: B,
        root_type: impl Into<String>,
    ) -> PersistResult<Self> {
        let root_type = root_type.into();
        if types.get(&root_type)?.kind != DescriptorKind::AggregateRoot {
            return Err(PersistError::configuration(format!(
                "'{root_type}' is not an aggregate root"
            )));
        }
        debug!(root_type = %root_type, "aggregate repository created");
        Ok(Self {
            types,
            store,
            bus,
            root_type,
            providers: ProviderRegistry::new(),
            config: RepositoryConfig::default(),
        })
    }

    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the foreign-key lookup for one relation.
    ///
    /// `path` is a reference name or a dotted composition path declared on
    /// `owner` whose target is `target`.
    pub fn with_record_provider(
        mut self,
        provider: Arc<dyn RecordProvider>,
        owner: &str,
        target: &str,
        path: &str,
    ) -> PersistResult<Self> {
        self.providers
            .register(&self.types, provider, owner, target, path)?;
        Ok(self)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    fn fetcher(&self) -> GraphFetcher<'_> {
        GraphFetcher::new(&self.types, &self.store, &self.providers)
            .with_max_depth(self.config.max_fetch_depth)
    }

    fn persister(&self) -> Persister<'_, B> {
        Persister::new(
            &self.types,
            &self.store,
            self.fetcher(),
            &self.bus,
            &self.root_type,
        )
        .emit_events(self.config.emit_events)
    }

    /// Load the whole aggregate identified by `id`.
    pub fn fetch_deep(&self, id: &Identity) -> PersistResult<Option<AggregateGraph>> {
        Ok(self.find_result_by_id(id)?.into_graph())
    }

    /// Load the aggregate rooted at an already-read root row.
    pub fn fetch_deep_record(&self, record: Record) -> PersistResult<Option<AggregateGraph>> {
        let table = &self.types.get(&self.root_type)?.table;
        if &record.table != table {
            return Err(PersistError::mapping(format!(
                "record of table '{}' is not a '{}' root row",
                record.table, self.root_type
            )));
        }
        Ok(self.fetcher().fetch_record(record)?.into_graph())
    }

    /// Like [`fetch_deep`](Self::fetch_deep), but also returns the fetch
    /// context (record/node mapping and unresolved back-references).
    pub fn find_result_by_id(&self, id: &Identity) -> PersistResult<FetchResult> {
        self.fetcher().find_result_by_id(&self.root_type, id)
    }

    pub fn insert(&self, graph: AggregateGraph) -> PersistResult<AggregateGraph> {
        self.persister().insert(graph)
    }

    pub fn update(&self, graph: AggregateGraph) -> PersistResult<AggregateGraph> {
        self.persister().update(graph)
    }

    pub fn delete_by_id(&self, id: &Identity) -> PersistResult<Option<AggregateGraph>> {
        self.persister().delete_by_id(id)
    }
}
