//! Deep fetch: flat, foreign-key-linked records → one aggregate graph.
//!
//! Traversal starts at a root record and follows every owned entity
//! reference (declared order), then materializes the value-object
//! compositions of each entity. A record met twice in one traversal is not
//! traversed again; the second encounter becomes a back-reference that is
//! linked once the whole graph has been staged, so shared children and
//! cycles terminate.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, instrument};

use aggregraph_core::{
    AggregateGraph, CompositionDescriptor, DescriptorKind, Identity, Multiplicity, Node, NodeId,
    NodeKind, PersistError, PersistResult, Record, RecordId, Slot, TypeDescriptor, TypeRegistry,
};

use crate::config::RepositoryConfig;
use crate::provider::{ForeignKeyLookup, ProviderRegistry, RecordProvider};
use crate::record_store::RecordSource;

/// A link to a record that was already fetched elsewhere in the traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackReference {
    pub owner: RecordId,
    pub target: RecordId,
    pub reference: String,
    pub multiplicity: Multiplicity,
}

/// Bookkeeping of one fetch: which record became which node.
///
/// Created fresh per fetch and handed back with the graph; the persister
/// uses it to find the stored row behind every node of a snapshot.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    nodes: HashMap<RecordId, NodeId>,
    records: HashMap<NodeId, Record>,
    fetched: HashSet<RecordId>,
    back_references: Vec<BackReference>,
}

impl FetchContext {
    pub fn node_for(&self, id: &RecordId) -> Option<NodeId> {
        self.nodes.get(id).copied()
    }

    pub fn record_for(&self, node: NodeId) -> Option<&Record> {
        self.records.get(&node)
    }

    pub fn is_fetched(&self, id: &RecordId) -> bool {
        self.fetched.contains(id)
    }

    pub fn back_references(&self) -> &[BackReference] {
        &self.back_references
    }

    /// Number of records materialized as nodes.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of a lookup by identity.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub graph: Option<AggregateGraph>,
    pub context: FetchContext,
}

impl FetchResult {
    pub fn into_graph(self) -> Option<AggregateGraph> {
        self.graph
    }
}

/// Reconstructs aggregate graphs from a [`RecordSource`].
#[derive(Clone, Copy)]
pub struct GraphFetcher<'a> {
    types: &'a TypeRegistry,
    source: &'a dyn RecordSource,
    providers: &'a ProviderRegistry,
    max_depth: usize,
}

impl<'a> GraphFetcher<'a> {
    pub fn new(
        types: &'a TypeRegistry,
        source: &'a dyn RecordSource,
        providers: &'a ProviderRegistry,
    ) -> Self {
        Self {
            types,
            source,
            providers,
            max_depth: RepositoryConfig::default().max_fetch_depth,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Fetch the aggregate of type `root_type` identified by `id`.
    #[instrument(level = "debug", skip(self, id), fields(identity = %id))]
    pub fn find_result_by_id(&self, root_type: &str, id: &Identity) -> PersistResult<FetchResult> {
        let descriptor = self.types.get(root_type)?;
        if descriptor.kind != DescriptorKind::AggregateRoot {
            return Err(PersistError::configuration(format!(
                "'{root_type}' is not an aggregate root"
            )));
        }

        match self.source.get(&descriptor.table, id.value())? {
            Some(record) => self.fetch_record(record),
            None => {
                debug!("aggregate not found");
                Ok(FetchResult::default())
            }
        }
    }

    /// Build the aggregate rooted at an already-loaded root record.
    pub fn fetch_record(&self, record: Record) -> PersistResult<FetchResult> {
        let types: &'a TypeRegistry = self.types;
        let descriptor = types.by_table(&record.table)?;
        if descriptor.kind != DescriptorKind::AggregateRoot {
            return Err(PersistError::mapping(format!(
                "{} is a '{}' row, not an aggregate root",
                record.id(),
                descriptor.name
            )));
        }

        let mut run = FetchRun::new(self);
        run.fetched.insert(record.id());
        run.entity(record, descriptor, 0)?;
        run.resolve_back_references();
        let result = run.freeze();

        if let Some(graph) = &result.graph {
            debug!(
                root_type = %descriptor.name,
                nodes = graph.len(),
                back_references = result.context.back_references.len(),
                "aggregate fetched"
            );
        }
        Ok(result)
    }

    fn related(
        &self,
        owner: &str,
        target: &TypeDescriptor,
        path: &str,
        column: &str,
        multiplicity: Multiplicity,
        parent: &Record,
    ) -> PersistResult<Vec<Record>> {
        let records = match self.providers.get(owner, &target.name, path) {
            Some(provider) => self.lookup(&**provider, multiplicity, parent)?,
            None => {
                let lookup = ForeignKeyLookup::new(target.table.clone(), column);
                self.lookup(&lookup, multiplicity, parent)?
            }
        };

        if let Some(stray) = records.iter().find(|r| r.table != target.table) {
            return Err(PersistError::mapping(format!(
                "relation '{owner}.{path}' yielded {}, expected a '{}' row",
                stray.id(),
                target.table
            )));
        }
        Ok(records)
    }

    fn lookup(
        &self,
        provider: &dyn RecordProvider,
        multiplicity: Multiplicity,
        parent: &Record,
    ) -> PersistResult<Vec<Record>> {
        Ok(match multiplicity {
            Multiplicity::One => provider.provide(self.source, parent)?.into_iter().collect(),
            Multiplicity::Many => provider.provide_collection(self.source, parent)?,
        })
    }
}

#[derive(Debug)]
enum StagedSlot {
    One(Option<usize>),
    Many(Vec<usize>),
}

impl StagedSlot {
    fn empty(multiplicity: Multiplicity) -> Self {
        match multiplicity {
            Multiplicity::One => StagedSlot::One(None),
            Multiplicity::Many => StagedSlot::Many(Vec::new()),
        }
    }
}

/// Mutable node under construction; frozen into the arena at the end.
#[derive(Debug)]
struct StagedNode {
    node: Node,
    slots: BTreeMap<String, StagedSlot>,
    record: Record,
}

struct FetchRun<'f, 'a> {
    fetcher: &'f GraphFetcher<'a>,
    staged: Vec<StagedNode>,
    index: HashMap<RecordId, usize>,
    fetched: HashSet<RecordId>,
    back_references: Vec<BackReference>,
}

impl<'f, 'a> FetchRun<'f, 'a> {
    fn new(fetcher: &'f GraphFetcher<'a>) -> Self {
        Self {
            fetcher,
            staged: Vec::new(),
            index: HashMap::new(),
            fetched: HashSet::new(),
            back_references: Vec::new(),
        }
    }

    fn stage(&mut self, node: Node, slots: BTreeMap<String, StagedSlot>, record: Record) -> usize {
        self.index.insert(record.id(), self.staged.len());
        self.staged.push(StagedNode {
            node,
            slots,
            record,
        });
        self.staged.len() - 1
    }

    fn attach(&mut self, owner: usize, slot: &str, multiplicity: Multiplicity, child: usize) {
        let entry = self.staged[owner]
            .slots
            .entry(slot.to_string())
            .or_insert_with(|| StagedSlot::empty(multiplicity));
        match entry {
            StagedSlot::One(existing) => *existing = Some(child),
            StagedSlot::Many(ids) => ids.push(child),
        }
    }

    fn entity(
        &mut self,
        record: Record,
        descriptor: &'a TypeDescriptor,
        depth: usize,
    ) -> PersistResult<usize> {
        let types: &'a TypeRegistry = self.fetcher.types;
        if depth > self.fetcher.max_depth {
            return Err(PersistError::mapping(format!(
                "fetch depth limit {} exceeded at {}",
                self.fetcher.max_depth,
                record.id()
            )));
        }

        let identity_field = descriptor.identity_field.as_deref().ok_or_else(|| {
            PersistError::configuration(format!("'{}' has no identity field", descriptor.name))
        })?;
        let identity = record.get(identity_field);
        if identity.is_null() {
            return Err(PersistError::mapping(format!(
                "{} has no identity value in column '{identity_field}'",
                record.id()
            )));
        }
        let id = Identity::new(identity.clone());
        let kind = match descriptor.kind {
            DescriptorKind::AggregateRoot => NodeKind::Root {
                id,
                version: descriptor
                    .version_field
                    .as_deref()
                    .map(|column| record.version(column))
                    .unwrap_or(0),
            },
            _ => NodeKind::Entity { id },
        };

        let mut node = Node::new(descriptor.name.clone(), kind);
        let pointers = descriptor.root_pointers().map(|r| &r.name);
        copy_fields(&mut node, &record, descriptor.fields.iter().chain(pointers));

        let mut slots = BTreeMap::new();
        for reference in descriptor.owned_references() {
            slots.insert(
                reference.name.clone(),
                StagedSlot::empty(reference.multiplicity),
            );
        }
        for composition in types.children_of(&descriptor.name, None) {
            slots.insert(
                composition.slot().to_string(),
                StagedSlot::empty(composition.multiplicity()),
            );
        }
        let idx = self.stage(node, slots, record.clone());

        for reference in descriptor.owned_references() {
            let target = types.get(&reference.target)?;
            let column = types.join_column_for_reference(&descriptor.name, &reference.name)?;
            let children = self.fetcher.related(
                &descriptor.name,
                target,
                &reference.name,
                column,
                reference.multiplicity,
                &record,
            )?;

            for child in children {
                let child_id = child.id();
                if self.fetched.contains(&child_id) {
                    debug!(
                        owner = %record.id(),
                        target = %child_id,
                        reference = %reference.name,
                        "back-reference recorded"
                    );
                    self.back_references.push(BackReference {
                        owner: record.id(),
                        target: child_id,
                        reference: reference.name.clone(),
                        multiplicity: reference.multiplicity,
                    });
                    continue;
                }
                self.fetched.insert(child_id);
                let child_idx = self.entity(child, target, depth + 1)?;
                self.attach(idx, &reference.name, reference.multiplicity, child_idx);
            }
        }

        self.values(idx, &record, descriptor)?;
        Ok(idx)
    }

    /// Materialize every value-object composition of one entity.
    ///
    /// Paths are processed shortest first so each nested composition can
    /// look up its containers among the rows of its parent path; links are
    /// made deepest first.
    fn values(
        &mut self,
        entity: usize,
        record: &Record,
        descriptor: &'a TypeDescriptor,
    ) -> PersistResult<()> {
        let types: &'a TypeRegistry = self.fetcher.types;
        let mut compositions: Vec<&'a CompositionDescriptor> =
            descriptor.compositions.iter().collect();
        compositions.sort_by_key(|c| c.path.len());

        let mut processed: Vec<(&'a CompositionDescriptor, Vec<(Record, usize)>)> = Vec::new();
        let mut links: Vec<(usize, &'a CompositionDescriptor, usize)> = Vec::new();

        for composition in compositions {
            let containers = processed
                .iter()
                .filter(|(parent, _)| parent.path.is_strict_prefix_of(&composition.path))
                .max_by_key(|(parent, _)| parent.path.len())
                .map(|(_, rows)| rows.clone())
                .unwrap_or_else(|| vec![(record.clone(), entity)]);

            let target = types.get(&composition.target)?;
            let column = types.join_column_for_composition(&descriptor.name, &composition.path)?;
            let dotted = composition.path.dotted();

            let mut produced = Vec::new();
            for (container, container_idx) in containers {
                let children = self.fetcher.related(
                    &descriptor.name,
                    target,
                    &dotted,
                    column,
                    composition.multiplicity(),
                    &container,
                )?;
                for child in children {
                    let mut node = Node::value(target.name.clone());
                    copy_fields(&mut node, &child, target.fields.iter());
                    let slots = types
                        .children_of(&descriptor.name, Some(&composition.path))
                        .into_iter()
                        .map(|c| (c.slot().to_string(), StagedSlot::empty(c.multiplicity())))
                        .collect();
                    let child_idx = self.stage(node, slots, child.clone());
                    links.push((container_idx, composition, child_idx));
                    produced.push((child, child_idx));
                }
            }
            processed.push((composition, produced));
        }

        links.sort_by(|a, b| b.1.path.len().cmp(&a.1.path.len()));
        for (container, composition, child) in links {
            self.attach(
                container,
                composition.slot(),
                composition.multiplicity(),
                child,
            );
        }
        Ok(())
    }

    fn resolve_back_references(&mut self) {
        let pending = std::mem::take(&mut self.back_references);
        for back in &pending {
            let owner = self.index.get(&back.owner).copied();
            let target = self.index.get(&back.target).copied();
            if let (Some(owner), Some(target)) = (owner, target) {
                self.attach(owner, &back.reference, back.multiplicity, target);
            }
        }
        self.back_references = pending;
    }

    /// Move every staged node into the arena; the first staged node is the root.
    fn freeze(self) -> FetchResult {
        let mut staged = self.staged.into_iter();
        let Some(first) = staged.next() else {
            return FetchResult::default();
        };

        let mut graph = AggregateGraph::from_root(first.node);
        let mut ids = vec![graph.root_id()];
        let mut slots = vec![first.slots];
        let mut records = vec![first.record];
        for node in staged {
            ids.push(graph.add(node.node));
            slots.push(node.slots);
            records.push(node.record);
        }

        for (owner, owner_slots) in slots.into_iter().enumerate() {
            for (name, slot) in owner_slots {
                let slot = match slot {
                    StagedSlot::One(child) => Slot::One(child.map(|c| ids[c])),
                    StagedSlot::Many(children) => {
                        Slot::Many(children.into_iter().map(|c| ids[c]).collect())
                    }
                };
                graph.set_slot(ids[owner], &name, slot);
            }
        }

        let context = FetchContext {
            nodes: self
                .index
                .into_iter()
                .map(|(record, i)| (record, ids[i]))
                .collect(),
            records: records
                .into_iter()
                .enumerate()
                .map(|(i, record)| (ids[i], record))
                .collect(),
            fetched: self.fetched,
            back_references: self.back_references,
        };

        FetchResult {
            graph: Some(graph),
            context,
        }
    }
}

fn copy_fields<'n>(node: &mut Node, record: &Record, names: impl Iterator<Item = &'n String>) {
    for name in names {
        let value = record.get(name);
        if !value.is_null() {
            node.set_field(name.clone(), value.clone());
        }
    }
}
