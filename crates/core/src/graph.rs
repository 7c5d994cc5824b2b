//! Arena-backed aggregate object graph.
//!
//! An [`AggregateGraph`] owns every node of one aggregate in a flat arena.
//! Slots refer to children by [`NodeId`], so a node may be referenced from
//! several places (shared identities) and cycles need no reference counting.
//! Nodes that become unreachable from the root are simply ignored by every
//! traversal.

use std::collections::{BTreeMap, HashSet};

use crate::id::{EntityKey, Identity, Value};

/// Index of a node inside one [`AggregateGraph`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What kind of domain object a node is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Entry point of the aggregate; carries the concurrency version.
    Root { id: Identity, version: u64 },
    /// Identified child object.
    Entity { id: Identity },
    /// Identity-less embedded object, compared by content.
    Value,
}

/// A child slot: singular or collection-valued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    One(Option<NodeId>),
    Many(Vec<NodeId>),
}

impl Slot {
    pub fn ids(&self) -> Vec<NodeId> {
        match self {
            Slot::One(id) => id.iter().copied().collect(),
            Slot::Many(ids) => ids.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Slot::One(id) => id.is_none(),
            Slot::Many(ids) => ids.is_empty(),
        }
    }
}

/// One domain object: scalar fields plus named child slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    type_name: String,
    kind: NodeKind,
    fields: BTreeMap<String, Value>,
    slots: BTreeMap<String, Slot>,
}

impl Node {
    pub fn new(type_name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
            fields: BTreeMap::new(),
            slots: BTreeMap::new(),
        }
    }

    pub fn root(type_name: impl Into<String>, id: impl Into<Identity>) -> Self {
        Self::new(
            type_name,
            NodeKind::Root {
                id: id.into(),
                version: 0,
            },
        )
    }

    pub fn entity(type_name: impl Into<String>, id: impl Into<Identity>) -> Self {
        Self::new(type_name, NodeKind::Entity { id: id.into() })
    }

    pub fn value(type_name: impl Into<String>) -> Self {
        Self::new(type_name, NodeKind::Value)
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.kind {
            NodeKind::Root { id, .. } | NodeKind::Entity { id } => Some(id),
            NodeKind::Value => None,
        }
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.identity()
            .map(|id| EntityKey::new(self.type_name.clone(), id.clone()))
    }

    pub fn is_value(&self) -> bool {
        matches!(self.kind, NodeKind::Value)
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Root { .. })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    pub fn slots(&self) -> &BTreeMap<String, Slot> {
        &self.slots
    }

    /// Children held in `name`, empty if the slot is absent.
    pub fn children(&self, name: &str) -> Vec<NodeId> {
        self.slots.get(name).map(Slot::ids).unwrap_or_default()
    }

    fn slot_entry(&mut self, name: &str) -> &mut Slot {
        self.slots
            .entry(name.to_string())
            .or_insert_with(|| Slot::Many(Vec::new()))
    }
}

/// One aggregate: an arena of nodes and the id of its root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateGraph {
    nodes: Vec<Node>,
    root: NodeId,
}

impl AggregateGraph {
    /// Start a graph from a fresh root at version 0.
    pub fn new(type_name: impl Into<String>, id: impl Into<Identity>) -> Self {
        Self::from_root(Node::root(type_name, id))
    }

    /// Start a graph from an already-built root node.
    ///
    /// A non-root node is promoted to a root at version 0; a value node keeps
    /// no identity and will be rejected when persisted.
    pub fn from_root(mut root: Node) -> Self {
        if let NodeKind::Entity { id } = &root.kind {
            root.kind = NodeKind::Root {
                id: id.clone(),
                version: 0,
            };
        }
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> &Node {
        &self.nodes[self.root.0]
    }

    pub fn root_type(&self) -> &str {
        self.root().type_name()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.root().identity()
    }

    pub fn version(&self) -> u64 {
        match self.root().kind {
            NodeKind::Root { version, .. } => version,
            _ => 0,
        }
    }

    /// Stamp the post-commit concurrency version onto the root.
    pub fn set_version(&mut self, new_version: u64) {
        if let NodeKind::Root { version, .. } = &mut self.nodes[self.root.0].kind {
            *version = new_version;
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Access a node by id.
    ///
    /// Ids are only ever minted by this graph, so an out-of-range id is a
    /// caller bug and panics like slice indexing.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a detached node to the arena.
    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Add `node` and append it to the collection slot `slot` of `owner`.
    pub fn push_child(&mut self, owner: NodeId, slot: &str, node: Node) -> NodeId {
        let id = self.add(node);
        self.push_link(owner, slot, id);
        id
    }

    /// Add `node` and place it in the singular slot `slot` of `owner`.
    pub fn set_child(&mut self, owner: NodeId, slot: &str, node: Node) -> NodeId {
        let id = self.add(node);
        self.set_link(owner, slot, Some(id));
        id
    }

    /// Append an existing node to a collection slot.
    ///
    /// A singular slot is widened into a collection.
    pub fn push_link(&mut self, owner: NodeId, slot: &str, child: NodeId) {
        let entry = self.nodes[owner.0].slot_entry(slot);
        match entry {
            Slot::Many(ids) => ids.push(child),
            Slot::One(existing) => {
                let mut ids: Vec<NodeId> = existing.iter().copied().collect();
                ids.push(child);
                *entry = Slot::Many(ids);
            }
        }
    }

    /// Point a singular slot at an existing node (or clear it).
    pub fn set_link(&mut self, owner: NodeId, slot: &str, child: Option<NodeId>) {
        self.nodes[owner.0]
            .slots
            .insert(slot.to_string(), Slot::One(child));
    }

    /// Replace a whole slot of `owner`.
    pub fn set_slot(&mut self, owner: NodeId, name: &str, slot: Slot) {
        self.nodes[owner.0].slots.insert(name.to_string(), slot);
    }

    /// Detach `child` from `owner`'s slot. Returns whether it was present.
    pub fn remove_child(&mut self, owner: NodeId, slot: &str, child: NodeId) -> bool {
        match self.nodes[owner.0].slots.get_mut(slot) {
            Some(Slot::One(existing)) if *existing == Some(child) => {
                *existing = None;
                true
            }
            Some(Slot::Many(ids)) => {
                let before = ids.len();
                ids.retain(|id| *id != child);
                ids.len() != before
            }
            _ => false,
        }
    }

    /// Empty a slot while keeping its shape.
    pub fn clear_slot(&mut self, owner: NodeId, slot: &str) {
        if let Some(entry) = self.nodes[owner.0].slots.get_mut(slot) {
            *entry = match entry {
                Slot::One(_) => Slot::One(None),
                Slot::Many(_) => Slot::Many(Vec::new()),
            };
        }
    }

    /// Nodes reachable from the root, depth-first pre-order, each once.
    pub fn reachable(&self) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            let node = &self.nodes[id.0];
            for slot in node.slots.values().rev() {
                for child in slot.ids().into_iter().rev() {
                    if !seen.contains(&child) {
                        stack.push(child);
                    }
                }
            }
        }
        order
    }

    /// First reachable node carrying the given entity key.
    pub fn find(&self, key: &EntityKey) -> Option<NodeId> {
        self.reachable()
            .into_iter()
            .find(|id| self.nodes[id.0].key().as_ref() == Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> AggregateGraph {
        let mut graph = AggregateGraph::new("Order", 1);
        let root = graph.root_id();
        let line = graph.push_child(root, "lines", Node::entity("OrderLine", 10));
        graph.set_child(line, "price", Node::value("Money").with_field("amount", 5));
        graph
    }

    #[test]
    fn new_graph_starts_at_version_zero() {
        let graph = order();
        assert_eq!(graph.version(), 0);
        assert_eq!(graph.identity(), Some(&Identity::from(1)));
        assert!(graph.root().is_root());
    }

    #[test]
    fn reachable_visits_pre_order() {
        let graph = order();
        let types: Vec<_> = graph
            .reachable()
            .into_iter()
            .map(|id| graph.node(id).type_name().to_string())
            .collect();
        assert_eq!(types, vec!["Order", "OrderLine", "Money"]);
    }

    #[test]
    fn shared_nodes_and_cycles_are_visited_once() {
        let mut graph = AggregateGraph::new("Catalog", 1);
        let root = graph.root_id();
        let a = graph.push_child(root, "categories", Node::entity("Category", "a"));
        let b = graph.push_child(a, "children", Node::entity("Category", "b"));
        graph.push_link(root, "categories", b);
        graph.push_link(b, "children", a);

        assert_eq!(graph.reachable().len(), 3);
    }

    #[test]
    fn push_link_widens_singular_slot() {
        let mut graph = AggregateGraph::new("Order", 1);
        let root = graph.root_id();
        let a = graph.set_child(root, "shipment", Node::entity("Shipment", 1));
        let b = graph.add(Node::entity("Shipment", 2));
        graph.push_link(root, "shipment", b);
        assert_eq!(graph.root().children("shipment"), vec![a, b]);
    }

    #[test]
    fn remove_child_detaches_from_both_slot_shapes() {
        let mut graph = order();
        let root = graph.root_id();
        let line = graph.root().children("lines")[0];
        let price = graph.node(line).children("price")[0];

        assert!(graph.remove_child(line, "price", price));
        assert_eq!(graph.node(line).slot("price"), Some(&Slot::One(None)));
        assert!(graph.remove_child(root, "lines", line));
        assert!(!graph.remove_child(root, "lines", line));
        assert_eq!(graph.reachable().len(), 1);
    }

    #[test]
    fn stamping_version_only_touches_root() {
        let mut graph = order();
        graph.set_version(3);
        assert_eq!(graph.version(), 3);
    }
}
