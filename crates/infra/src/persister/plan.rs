//! Diff of a submitted graph against its stored snapshot.
//!
//! The planner walks the submitted graph depth-first and emits one
//! [`Step`] per affected node in post-order: children before their owner,
//! nested value objects before their container, the root last. Steps carry
//! the row mutation (absent for event-only updates) and the lifecycle event.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use aggregraph_core::{
    AggregateGraph, CompositionDescriptor, EntityKey, Identity, Multiplicity, Node, NodeId,
    NodeKind, PersistError, PersistResult, Record, ReferenceDescriptor, TypeDescriptor,
    TypeRegistry, Value, VersionGuard, next_version, value_snapshot,
};
use aggregraph_events::{EventKind, LifecycleEvent, ObjectRef};

use crate::fetcher::FetchContext;
use crate::record_store::RowOp;

use super::index::GraphIndex;

/// One planned change.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub op: Option<RowOp>,
    pub event: LifecycleEvent,
}

/// Ordered steps of one operation.
#[derive(Debug, Clone, Default)]
pub(crate) struct MutationPlan {
    pub steps: Vec<Step>,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Row operations and events, each in plan order.
    pub fn into_parts(self) -> (Vec<RowOp>, Vec<LifecycleEvent>) {
        let mut ops = Vec::new();
        let mut events = Vec::with_capacity(self.steps.len());
        for step in self.steps {
            ops.extend(step.op);
            events.push(step.event);
        }
        (ops, events)
    }
}

#[derive(Clone, Copy)]
struct Stored<'a> {
    graph: &'a AggregateGraph,
    context: &'a FetchContext,
}

pub(crate) struct Planner<'a> {
    types: &'a TypeRegistry,
    aggregate: Identity,
    new: &'a AggregateGraph,
    index: &'a GraphIndex,
    stored: Option<Stored<'a>>,
    stored_keys: HashMap<EntityKey, NodeId>,
    visited: HashMap<EntityKey, bool>,
    deleted: HashSet<NodeId>,
    steps: Vec<Step>,
    max_depth: usize,
}

impl<'a> Planner<'a> {
    pub fn new(types: &'a TypeRegistry, new: &'a AggregateGraph, index: &'a GraphIndex) -> Self {
        Self {
            types,
            aggregate: new
                .identity()
                .cloned()
                .unwrap_or_else(|| Identity::new(Value::Null)),
            new,
            index,
            stored: None,
            stored_keys: HashMap::new(),
            visited: HashMap::new(),
            deleted: HashSet::new(),
            steps: Vec::new(),
            max_depth: usize::MAX,
        }
    }

    /// Reject graphs nesting entities deeper than the fetcher can read back.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Diff against a fetched snapshot instead of an empty store.
    pub fn against(mut self, graph: &'a AggregateGraph, context: &'a FetchContext) -> Self {
        self.stored_keys = graph
            .reachable()
            .into_iter()
            .filter_map(|id| graph.node(id).key().map(|key| (key, id)))
            .collect();
        self.stored = Some(Stored { graph, context });
        self
    }

    /// Plan an insert (no snapshot) or an update (with one).
    pub fn plan_write(mut self) -> PersistResult<MutationPlan> {
        self.visit_entity(self.new.root_id(), None, 0)?;
        Ok(MutationPlan { steps: self.steps })
    }

    /// Plan the removal of the whole stored aggregate.
    pub fn plan_delete(mut self) -> PersistResult<MutationPlan> {
        let stored = self.stored()?;
        self.delete_entity(stored.graph.root_id(), None)?;
        Ok(MutationPlan { steps: self.steps })
    }

    fn stored(&self) -> PersistResult<Stored<'a>> {
        self.stored
            .ok_or_else(|| PersistError::mapping("no stored snapshot to diff against"))
    }

    fn push(&mut self, op: Option<RowOp>, kind: EventKind, object: ObjectRef, owner: Option<ObjectRef>) {
        let event = LifecycleEvent::new(kind, self.aggregate.clone(), object, owner);
        self.steps.push(Step { op, event });
    }

    /// Post-order visit of one entity; returns whether it or anything below
    /// it changed.
    fn visit_entity(
        &mut self,
        id: NodeId,
        owner: Option<NodeId>,
        depth: usize,
    ) -> PersistResult<bool> {
        let new = self.new;
        let types = self.types;
        let node = new.node(id);
        let key = node.key().ok_or_else(|| {
            PersistError::mapping(format!("'{}' value node used as an entity", node.type_name()))
        })?;
        if let Some(&changed) = self.visited.get(&key) {
            return Ok(changed);
        }
        if depth > self.max_depth {
            return Err(PersistError::mapping(format!(
                "{key} nests {depth} entities deep, past the limit of {}",
                self.max_depth
            )));
        }
        self.visited.insert(key.clone(), false);

        let descriptor = types.get(node.type_name())?;
        if descriptor.is_value_object() {
            return Err(PersistError::mapping(format!(
                "{key} has an identity but '{}' is a value object",
                descriptor.name
            )));
        }
        let top_level = types.children_of(&descriptor.name, None);
        let mut allowed: Vec<&str> = descriptor
            .owned_references()
            .map(|r| r.name.as_str())
            .collect();
        allowed.extend(top_level.iter().map(|c| c.slot()));
        check_slots(node, &allowed)?;

        let stored_id = self.stored_keys.get(&key).copied();
        let mut changed = false;

        for reference in descriptor.owned_references() {
            let children = self.entity_children(id, reference)?;
            if let Some(stored_id) = stored_id {
                changed |= self.prune_removed(stored_id, reference, &children)?;
            }
            for child in children {
                changed |= self.visit_entity(child, Some(id), depth + 1)?;
            }
        }

        for composition in top_level {
            changed |= self.diff_values(id, stored_id, descriptor, composition)?;
        }

        changed |= self.write_entity(id, owner, stored_id, descriptor, changed)?;
        self.visited.insert(key, changed);
        Ok(changed)
    }

    /// Canonical child entities of one owned-reference slot.
    fn entity_children(
        &self,
        id: NodeId,
        reference: &ReferenceDescriptor,
    ) -> PersistResult<Vec<NodeId>> {
        let node = self.new.node(id);
        let children = node.children(&reference.name);
        if reference.multiplicity == Multiplicity::One && children.len() > 1 {
            return Err(PersistError::mapping(format!(
                "'{}.{}' is singular but holds {} entities",
                node.type_name(),
                reference.name,
                children.len()
            )));
        }

        children
            .into_iter()
            .map(|child| {
                let child_node = self.new.node(child);
                let key = match child_node.kind() {
                    NodeKind::Entity { .. } => child_node.key(),
                    _ => None,
                }
                .filter(|key| key.type_name == reference.target)
                .ok_or_else(|| {
                    PersistError::mapping(format!(
                        "'{}.{}' holds a '{}' node, expected a '{}' entity",
                        node.type_name(),
                        reference.name,
                        child_node.type_name(),
                        reference.target
                    ))
                })?;
                Ok(self.index.canonical(&key).unwrap_or(child))
            })
            .collect()
    }

    /// Delete stored children no longer held in this slot; report whether
    /// the slot's membership changed.
    fn prune_removed(
        &mut self,
        stored_id: NodeId,
        reference: &ReferenceDescriptor,
        children: &[NodeId],
    ) -> PersistResult<bool> {
        let stored = self.stored()?;
        let new_keys: HashSet<EntityKey> = children
            .iter()
            .filter_map(|&c| self.new.node(c).key())
            .collect();
        let mut stored_keys = HashSet::new();

        for child in stored.graph.node(stored_id).children(&reference.name) {
            let Some(key) = stored.graph.node(child).key() else {
                continue;
            };
            stored_keys.insert(key.clone());
            if new_keys.contains(&key) || self.index.contains(&key) {
                continue;
            }
            self.delete_entity(child, Some(stored_id))?;
        }
        Ok(stored_keys != new_keys)
    }

    /// Value objects of one top-level composition, matched by content.
    fn diff_values(
        &mut self,
        entity: NodeId,
        stored_entity: Option<NodeId>,
        owner: &'a TypeDescriptor,
        composition: &'a CompositionDescriptor,
    ) -> PersistResult<bool> {
        let fresh = self.value_children(entity, composition)?;
        let previous: Vec<NodeId> = match (stored_entity, self.stored) {
            (Some(stored_entity), Some(stored)) => stored
                .graph
                .node(stored_entity)
                .children(composition.slot()),
            _ => Vec::new(),
        };

        let mut unmatched_new = Vec::new();
        let mut matched = vec![false; previous.len()];
        if let Some(stored) = self.stored {
            let snapshots: Vec<_> = previous
                .iter()
                .map(|&v| value_snapshot(stored.graph, v))
                .collect();
            for &value in &fresh {
                let snapshot = value_snapshot(self.new, value);
                match (0..snapshots.len()).find(|&i| !matched[i] && snapshots[i] == snapshot) {
                    Some(i) => matched[i] = true,
                    None => unmatched_new.push(value),
                }
            }
        } else {
            unmatched_new = fresh;
        }

        let mut changed = false;
        for (value, _) in previous.iter().zip(&matched).filter(|(_, m)| !**m) {
            self.delete_value(*value, owner, composition, stored_entity)?;
            changed = true;
        }

        let container = entity_key_value(self.new.node(entity));
        for value in unmatched_new {
            self.insert_value(value, owner, composition, container.clone(), entity)?;
            changed = true;
        }
        Ok(changed)
    }

    fn value_children(
        &self,
        container: NodeId,
        composition: &CompositionDescriptor,
    ) -> PersistResult<Vec<NodeId>> {
        let node = self.new.node(container);
        let children = node.children(composition.slot());
        if composition.multiplicity() == Multiplicity::One && children.len() > 1 {
            return Err(PersistError::mapping(format!(
                "'{}.{}' is singular but holds {} values",
                node.type_name(),
                composition.slot(),
                children.len()
            )));
        }
        for &child in &children {
            let child_node = self.new.node(child);
            if !child_node.is_value() || child_node.type_name() != composition.target {
                return Err(PersistError::mapping(format!(
                    "'{}.{}' holds a '{}' node, expected a '{}' value",
                    node.type_name(),
                    composition.slot(),
                    child_node.type_name(),
                    composition.target
                )));
            }
        }
        Ok(children)
    }

    /// Insert a value object and its nested values; nested rows first.
    fn insert_value(
        &mut self,
        id: NodeId,
        owner: &'a TypeDescriptor,
        composition: &'a CompositionDescriptor,
        container_key: Value,
        container: NodeId,
    ) -> PersistResult<()> {
        let types = self.types;
        let new = self.new;
        let node = new.node(id);
        let target = types.get(&composition.target)?;
        let key = Value::Uuid(Uuid::now_v7());

        let nested = types.children_of(&owner.name, Some(&composition.path));
        let allowed: Vec<&str> = nested.iter().map(|c| c.slot()).collect();
        check_slots(node, &allowed)?;
        for child_composition in nested {
            for child in self.value_children(id, child_composition)? {
                self.insert_value(child, owner, child_composition, key.clone(), id)?;
            }
        }

        let column = types.join_column_for_composition(&owner.name, &composition.path)?;
        let mut record = Record::new(target.table.clone(), key);
        copy_declared(&mut record, node, target, &[])?;
        record.set(column, container_key);

        self.push(
            Some(RowOp::Insert(record)),
            EventKind::Inserted,
            ObjectRef::in_graph(new, id),
            Some(ObjectRef::in_graph(new, container)),
        );
        Ok(())
    }

    /// Delete a stored value object and its nested values; nested rows first.
    fn delete_value(
        &mut self,
        id: NodeId,
        owner: &'a TypeDescriptor,
        composition: &'a CompositionDescriptor,
        container: Option<NodeId>,
    ) -> PersistResult<()> {
        let types = self.types;
        let stored = self.stored()?;
        let node = stored.graph.node(id);
        for child_composition in types.children_of(&owner.name, Some(&composition.path)) {
            for child in node.children(child_composition.slot()) {
                self.delete_value(child, owner, child_composition, Some(id))?;
            }
        }

        let row = stored_row(stored, id)?;
        self.push(
            Some(RowOp::Delete {
                id: row.id(),
                guard: None,
            }),
            EventKind::Deleted,
            ObjectRef::in_graph(stored.graph, id),
            container.map(|c| ObjectRef::in_graph(stored.graph, c)),
        );
        Ok(())
    }

    /// Delete a stored entity subtree, skipping entities that survive
    /// elsewhere in the submitted graph.
    fn delete_entity(&mut self, id: NodeId, owner: Option<NodeId>) -> PersistResult<()> {
        if !self.deleted.insert(id) {
            return Ok(());
        }
        let types = self.types;
        let stored = self.stored()?;
        let node = stored.graph.node(id);
        let descriptor = types.get(node.type_name())?;

        for reference in descriptor.owned_references() {
            for child in node.children(&reference.name) {
                let survives = stored
                    .graph
                    .node(child)
                    .key()
                    .is_some_and(|key| self.index.contains(&key));
                if !survives {
                    self.delete_entity(child, Some(id))?;
                }
            }
        }
        for composition in types.children_of(&descriptor.name, None) {
            for value in node.children(composition.slot()) {
                self.delete_value(value, descriptor, composition, Some(id))?;
            }
        }

        let row = stored_row(stored, id)?;
        let guard = if node.is_root() {
            descriptor
                .version_field
                .as_ref()
                .map(|column| VersionGuard::exact(column.clone(), stored.graph.version()))
        } else {
            None
        };
        self.push(
            Some(RowOp::Delete {
                id: row.id(),
                guard,
            }),
            EventKind::Deleted,
            ObjectRef::in_graph(stored.graph, id),
            owner.map(|o| ObjectRef::in_graph(stored.graph, o)),
        );
        Ok(())
    }

    /// Emit the entity's own step after its subtree.
    fn write_entity(
        &mut self,
        id: NodeId,
        owner: Option<NodeId>,
        stored_id: Option<NodeId>,
        descriptor: &'a TypeDescriptor,
        subtree_changed: bool,
    ) -> PersistResult<bool> {
        let new = self.new;
        let node = new.node(id);
        let mut row = self.entity_row(id, descriptor)?;
        if node.is_root() {
            if let Some(column) = &descriptor.version_field {
                let version = next_version(new.version());
                row.set(column.clone(), i64::try_from(version).unwrap_or(i64::MAX));
            }
        }
        let object = ObjectRef::in_graph(new, id);
        let owner = owner.map(|o| ObjectRef::in_graph(new, o));

        let Some(stored_id) = stored_id else {
            self.push(Some(RowOp::Insert(row)), EventKind::Inserted, object, owner);
            return Ok(true);
        };

        let stored = stored_row(self.stored()?, stored_id)?;
        let row_changed = !row.same_columns(stored, descriptor.version_field.as_deref());

        if node.is_root() {
            if !(row_changed || subtree_changed) {
                return Ok(false);
            }
            let guard = descriptor
                .version_field
                .as_ref()
                .map(|column| VersionGuard::exact(column.clone(), new.version()));
            self.push(
                Some(RowOp::Update { record: row, guard }),
                EventKind::Updated,
                object,
                owner,
            );
            return Ok(true);
        }

        if row_changed {
            self.push(
                Some(RowOp::Update {
                    record: row,
                    guard: None,
                }),
                EventKind::Updated,
                object,
                owner,
            );
            Ok(true)
        } else if subtree_changed {
            self.push(None, EventKind::Updated, object, owner);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Desired row of an entity: declared fields, root pointers, identity
    /// and the join columns implied by its incoming edges. Join columns with
    /// no incoming edge are cleared; other foreign keys keep their declared
    /// values.
    fn entity_row(&self, id: NodeId, descriptor: &TypeDescriptor) -> PersistResult<Record> {
        let node = self.new.node(id);
        let key = node.key().ok_or_else(|| {
            PersistError::mapping(format!("'{}' node has no identity", node.type_name()))
        })?;
        let identity_field = descriptor.identity_field.as_deref().ok_or_else(|| {
            PersistError::configuration(format!("'{}' has no identity field", descriptor.name))
        })?;

        let identity = key.identity.value().clone();
        let mut record = Record::new(descriptor.table.clone(), identity.clone());
        let pointers: Vec<&str> = descriptor
            .root_pointers()
            .map(|r| r.name.as_str())
            .collect();
        copy_declared(&mut record, node, descriptor, &pointers)?;
        record.set(identity_field, identity);

        for column in self.types.inbound_join_columns(&descriptor.name) {
            record.set(column, Value::Null);
        }
        for edge in self.index.incoming(&key) {
            let holder = self.new.node(edge.owner);
            let column = self
                .types
                .join_column_for_reference(holder.type_name(), &edge.reference)?;
            let value = entity_key_value(holder);
            let current = record.get(column);
            if !current.is_null() && *current != value {
                return Err(PersistError::mapping(format!(
                    "{key} is held through '{column}' by both {current} and {value}"
                )));
            }
            record.set(column, value);
        }
        Ok(record)
    }
}

fn entity_key_value(node: &Node) -> Value {
    node.identity()
        .map(|id| id.value().clone())
        .unwrap_or(Value::Null)
}

fn stored_row(stored: Stored<'_>, id: NodeId) -> PersistResult<&Record> {
    stored.context.record_for(id).ok_or_else(|| {
        PersistError::mapping(format!(
            "no stored row behind '{}' node",
            stored.graph.node(id).type_name()
        ))
    })
}

/// Reject non-empty slots the type does not declare.
fn check_slots(node: &Node, allowed: &[&str]) -> PersistResult<()> {
    for (name, slot) in node.slots() {
        if !slot.is_empty() && !allowed.contains(&name.as_str()) {
            return Err(PersistError::mapping(format!(
                "'{}' declares no relation '{name}'",
                node.type_name()
            )));
        }
    }
    Ok(())
}

/// Copy declared fields (and `extra` columns) from a node onto a row.
fn copy_declared(
    record: &mut Record,
    node: &Node,
    descriptor: &TypeDescriptor,
    extra: &[&str],
) -> PersistResult<()> {
    let declared = |name: &str| descriptor.fields.iter().any(|f| f == name) || extra.contains(&name);
    if let Some(name) = node.fields().keys().find(|name| !declared(name.as_str())) {
        return Err(PersistError::mapping(format!(
            "field '{name}' is not declared on '{}'",
            descriptor.name
        )));
    }

    for name in descriptor.fields.iter().map(String::as_str).chain(extra.iter().copied()) {
        record.set(name, node.field(name).cloned().unwrap_or(Value::Null));
    }
    Ok(())
}
