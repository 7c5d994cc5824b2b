//! Diff-and-cascade persister.
//!
//! Every write runs through the same phases:
//!
//! `Diffing → Validating → Mutating → EventEmitting → VersionStamping → Committed`
//!
//! or drops to `Failed` from any of them. Row mutations are handed to the
//! store as one atomic batch, and events are published only after that
//! batch committed, so a failed operation leaves neither rows nor events.

mod index;
mod plan;

use tracing::{debug, info, warn};

use aggregraph_core::{
    AggregateGraph, Identity, PersistError, PersistResult, StorageError, TypeRegistry, Value,
    next_version,
};
use aggregraph_events::{EventBus, LifecycleEvent};

use crate::fetcher::{FetchResult, GraphFetcher};
use crate::record_store::RecordStore;

use index::GraphIndex;
use plan::{MutationPlan, Planner};

/// Stage of one persist operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PersistPhase {
    Diffing,
    Validating,
    Mutating,
    EventEmitting,
    VersionStamping,
    Committed,
    Failed,
}

/// Phase transitions of one operation, logged as they happen.
#[derive(Debug)]
struct PhaseLog {
    operation: &'static str,
    identity: Identity,
    history: Vec<PersistPhase>,
}

impl PhaseLog {
    fn new(operation: &'static str, identity: Identity) -> Self {
        Self {
            operation,
            identity,
            history: Vec::new(),
        }
    }

    fn current(&self) -> Option<PersistPhase> {
        self.history.last().copied()
    }

    fn enter(&mut self, phase: PersistPhase) {
        debug!(
            operation = self.operation,
            identity = %self.identity,
            from = ?self.current(),
            to = ?phase,
            "persist phase"
        );
        self.history.push(phase);
    }

    fn fail(&mut self, error: &PersistError) {
        warn!(
            operation = self.operation,
            identity = %self.identity,
            phase = ?self.current(),
            error = %error,
            "persist failed"
        );
        self.history.push(PersistPhase::Failed);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Update,
}

impl WriteMode {
    fn name(self) -> &'static str {
        match self {
            WriteMode::Insert => "insert",
            WriteMode::Update => "update",
        }
    }
}

/// Writes and deletes whole aggregates of one root type.
pub struct Persister<'a, B> {
    types: &'a TypeRegistry,
    store: &'a dyn RecordStore,
    fetcher: GraphFetcher<'a>,
    bus: &'a B,
    root_type: &'a str,
    emit_events: bool,
}

impl<'a, B> Persister<'a, B>
where
    B: EventBus<LifecycleEvent>,
{
    pub fn new(
        types: &'a TypeRegistry,
        store: &'a dyn RecordStore,
        fetcher: GraphFetcher<'a>,
        bus: &'a B,
        root_type: &'a str,
    ) -> Self {
        Self {
            types,
            store,
            fetcher,
            bus,
            root_type,
            emit_events: true,
        }
    }

    pub fn emit_events(mut self, emit: bool) -> Self {
        self.emit_events = emit;
        self
    }

    /// Persist a brand-new aggregate; returns it stamped with version 1
    /// past the submitted one.
    pub fn insert(&self, graph: AggregateGraph) -> PersistResult<AggregateGraph> {
        self.write(WriteMode::Insert, graph)
    }

    /// Persist the difference between `graph` and the stored aggregate.
    ///
    /// Fails with a concurrency error if the stored root is no longer at
    /// the version `graph` carries. An unchanged graph is returned as is.
    pub fn update(&self, graph: AggregateGraph) -> PersistResult<AggregateGraph> {
        self.write(WriteMode::Update, graph)
    }

    /// Delete the aggregate and every row it owns.
    ///
    /// Returns the snapshot as it was fetched, or `None` (and no events)
    /// when nothing is stored under `id`.
    pub fn delete_by_id(&self, id: &Identity) -> PersistResult<Option<AggregateGraph>> {
        let mut log = PhaseLog::new("delete", id.clone());
        self.delete_phases(&mut log, id).inspect_err(|err| log.fail(err))
    }

    fn write(&self, mode: WriteMode, mut graph: AggregateGraph) -> PersistResult<AggregateGraph> {
        let identity = graph
            .identity()
            .cloned()
            .unwrap_or_else(|| Identity::new(Value::Null));
        let mut log = PhaseLog::new(mode.name(), identity);
        self.write_logged(&mut log, mode, &mut graph)?;
        Ok(graph)
    }

    fn write_logged(
        &self,
        log: &mut PhaseLog,
        mode: WriteMode,
        graph: &mut AggregateGraph,
    ) -> PersistResult<()> {
        self.check_root(graph)
            .and_then(|identity| self.write_phases(log, mode, &identity, graph))
            .inspect_err(|err| log.fail(err))
    }

    fn check_root(&self, graph: &AggregateGraph) -> PersistResult<Identity> {
        if graph.root_type() != self.root_type {
            return Err(PersistError::mapping(format!(
                "graph root is a '{}', expected '{}'",
                graph.root_type(),
                self.root_type
            )));
        }
        graph
            .identity()
            .cloned()
            .ok_or_else(|| PersistError::mapping("aggregate root has no identity"))
    }

    fn write_phases(
        &self,
        log: &mut PhaseLog,
        mode: WriteMode,
        identity: &Identity,
        graph: &mut AggregateGraph,
    ) -> PersistResult<()> {
        log.enter(PersistPhase::Diffing);
        let stored = match mode {
            WriteMode::Insert => None,
            WriteMode::Update => Some(self.fetch_existing(identity)?),
        };

        let index = GraphIndex::build(self.types, graph)?;
        let plan = {
            let mut planner =
                Planner::new(self.types, graph, &index).with_max_depth(self.fetcher.max_depth());
            if let Some(FetchResult {
                graph: Some(snapshot),
                context,
            }) = &stored
            {
                planner = planner.against(snapshot, context);
            }
            planner.plan_write()?
        };

        log.enter(PersistPhase::Validating);
        index.check_consistency()?;
        if plan.is_empty() {
            log.enter(PersistPhase::Committed);
            debug!(operation = mode.name(), identity = %identity, "nothing to persist");
            return Ok(());
        }

        let version = next_version(graph.version());
        self.commit(log, identity, plan)?;

        log.enter(PersistPhase::VersionStamping);
        graph.set_version(version);
        log.enter(PersistPhase::Committed);
        Ok(())
    }

    fn fetch_existing(&self, identity: &Identity) -> PersistResult<FetchResult> {
        let fetched = self.fetcher.find_result_by_id(self.root_type, identity)?;
        if fetched.graph.is_none() {
            let table = self.types.get(self.root_type)?.table.clone();
            return Err(StorageError::MissingRow {
                table,
                key: identity.to_string(),
            }
            .into());
        }
        Ok(fetched)
    }

    fn delete_phases(
        &self,
        log: &mut PhaseLog,
        id: &Identity,
    ) -> PersistResult<Option<AggregateGraph>> {
        log.enter(PersistPhase::Diffing);
        let fetched = self.fetcher.find_result_by_id(self.root_type, id)?;
        let Some(snapshot) = fetched.graph.as_ref() else {
            debug!(identity = %id, "nothing to delete");
            return Ok(None);
        };

        let index = GraphIndex::default();
        let plan = Planner::new(self.types, snapshot, &index)
            .against(snapshot, &fetched.context)
            .plan_delete()?;

        log.enter(PersistPhase::Validating);
        self.commit(log, id, plan)?;
        log.enter(PersistPhase::Committed);
        Ok(fetched.graph)
    }

    /// Apply the batch, then publish its events in plan order.
    fn commit(&self, log: &mut PhaseLog, identity: &Identity, plan: MutationPlan) -> PersistResult<()> {
        let (ops, events) = plan.into_parts();
        let (op_count, event_count) = (ops.len(), events.len());

        log.enter(PersistPhase::Mutating);
        self.store.apply(ops)?;

        log.enter(PersistPhase::EventEmitting);
        if self.emit_events {
            for event in events {
                self.bus
                    .publish(event)
                    .map_err(|err| PersistError::Publish(format!("{err:?}")))?;
            }
        }

        info!(
            operation = log.operation,
            root_type = self.root_type,
            identity = %identity,
            ops = op_count,
            events = event_count,
            "aggregate committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use aggregraph_core::Node;
    use aggregraph_events::InMemoryEventBus;

    use super::*;
    use crate::fixtures;
    use crate::provider::ProviderRegistry;
    use crate::record_store::InMemoryRecordStore;

    struct Harness {
        types: TypeRegistry,
        store: InMemoryRecordStore,
        providers: ProviderRegistry,
        bus: InMemoryEventBus<LifecycleEvent>,
    }

    impl Harness {
        fn catalog() -> Self {
            let types = fixtures::catalog_types();
            let store = InMemoryRecordStore::for_registry(&types);
            Self {
                types,
                store,
                providers: ProviderRegistry::new(),
                bus: InMemoryEventBus::new(),
            }
        }

        fn persister(&self) -> Persister<'_, InMemoryEventBus<LifecycleEvent>> {
            let fetcher = GraphFetcher::new(&self.types, &self.store, &self.providers);
            Persister::new(&self.types, &self.store, fetcher, &self.bus, "Catalog")
        }
    }

    #[test]
    fn consistency_failure_stops_before_mutating() {
        let harness = Harness::catalog();
        let mut graph = fixtures::shared_catalog(1);
        let root = graph.root_id();
        let copy = graph.add(Node::entity("Category", "b").with_field("name", "Nails"));
        graph.push_link(root, "categories", copy);

        let persister = harness.persister();
        let mut log = PhaseLog::new("insert", Identity::from(1));
        let err = persister
            .write_phases(&mut log, WriteMode::Insert, &Identity::from(1), &mut graph)
            .unwrap_err();

        assert!(matches!(err, PersistError::Consistency(_)));
        assert_eq!(
            log.history,
            vec![PersistPhase::Diffing, PersistPhase::Validating]
        );
        assert_eq!(harness.store.row_count().unwrap(), 0);
    }

    #[test]
    fn successful_insert_walks_every_phase() {
        let harness = Harness::catalog();
        let mut graph = fixtures::shared_catalog(1);

        let persister = harness.persister();
        let mut log = PhaseLog::new("insert", Identity::from(1));
        persister
            .write_phases(&mut log, WriteMode::Insert, &Identity::from(1), &mut graph)
            .unwrap();

        assert_eq!(
            log.history,
            vec![
                PersistPhase::Diffing,
                PersistPhase::Validating,
                PersistPhase::Mutating,
                PersistPhase::EventEmitting,
                PersistPhase::VersionStamping,
                PersistPhase::Committed,
            ]
        );
        assert_eq!(graph.version(), 1);
    }

    #[test]
    fn failure_is_recorded_as_terminal_phase() {
        let harness = Harness::catalog();
        let persister = harness.persister();
        let err = persister
            .update(fixtures::shared_catalog(5))
            .unwrap_err();
        assert!(matches!(
            err,
            PersistError::Storage(StorageError::MissingRow { .. })
        ));

        let mut log = PhaseLog::new("update", Identity::from(5));
        log.enter(PersistPhase::Diffing);
        log.fail(&err);
        assert_eq!(log.current(), Some(PersistPhase::Failed));
    }

    #[test]
    fn disabled_events_still_commit_rows() {
        let harness = Harness::catalog();
        let subscription = harness.bus.subscribe();
        let persister = harness.persister().emit_events(false);

        persister.insert(fixtures::shared_catalog(1)).unwrap();
        assert_eq!(harness.store.row_count().unwrap(), 3);
        assert!(subscription.drain().is_empty());
    }

    #[test]
    fn foreign_root_type_is_rejected() {
        let harness = Harness::catalog();
        let err = harness
            .persister()
            .insert(AggregateGraph::new("Order", 1))
            .unwrap_err();
        assert!(matches!(err, PersistError::Mapping(_)));
    }

    #[test]
    fn rejected_root_type_is_logged_as_failed() {
        let harness = Harness::catalog();
        let mut graph = AggregateGraph::new("Order", 1);
        let mut log = PhaseLog::new("insert", Identity::from(1));

        let err = harness
            .persister()
            .write_logged(&mut log, WriteMode::Insert, &mut graph)
            .unwrap_err();

        assert!(matches!(err, PersistError::Mapping(_)));
        assert_eq!(log.history, vec![PersistPhase::Failed]);
    }

    #[test]
    fn root_without_identity_is_logged_as_failed() {
        let harness = Harness::catalog();
        let mut graph = AggregateGraph::from_root(Node::value("Catalog"));
        let mut log = PhaseLog::new("update", Identity::new(Value::Null));

        let err = harness
            .persister()
            .write_logged(&mut log, WriteMode::Update, &mut graph)
            .unwrap_err();

        assert!(matches!(err, PersistError::Mapping(_)));
        assert_eq!(log.current(), Some(PersistPhase::Failed));
        assert_eq!(harness.store.row_count().unwrap(), 0);
    }

    #[test]
    fn too_deep_graph_fails_while_diffing() {
        let harness = Harness::catalog();
        let fetcher =
            GraphFetcher::new(&harness.types, &harness.store, &harness.providers).with_max_depth(2);
        let persister =
            Persister::new(&harness.types, &harness.store, fetcher, &harness.bus, "Catalog");
        let mut graph = fixtures::category_chain(1, 3);
        let mut log = PhaseLog::new("insert", Identity::from(1));

        let err = persister
            .write_logged(&mut log, WriteMode::Insert, &mut graph)
            .unwrap_err();

        assert!(matches!(err, PersistError::Mapping(_)));
        assert_eq!(
            log.history,
            vec![PersistPhase::Diffing, PersistPhase::Failed]
        );
        assert_eq!(harness.store.row_count().unwrap(), 0);
    }
}
