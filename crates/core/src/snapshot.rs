//! Order-insensitive content fingerprints of aggregate graphs.
//!
//! Snapshots treat a missing field and a `Null` field as equal, ignore empty
//! slots, and sort collection contents, so two graphs that differ only in
//! collection order or arena layout produce equal snapshots.

use std::collections::{BTreeMap, HashSet};

use crate::graph::{AggregateGraph, NodeId};
use crate::id::{EntityKey, Value};

/// A child as seen from its owner: entities by key, value objects by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildSnapshot {
    Entity(EntityKey),
    Value(ValueSnapshot),
}

/// Full content of a value object, including nested value objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueSnapshot {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
    pub slots: BTreeMap<String, Vec<ChildSnapshot>>,
}

/// Content of one entity: its own fields and the children it points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntitySnapshot {
    pub fields: BTreeMap<String, Value>,
    pub slots: BTreeMap<String, Vec<ChildSnapshot>>,
}

/// Every reachable entity of a graph, keyed by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSnapshot {
    pub root: Option<EntityKey>,
    pub entities: BTreeMap<EntityKey, EntitySnapshot>,
}

impl GraphSnapshot {
    /// Fingerprint a graph; the first occurrence of a repeated key wins.
    pub fn of(graph: &AggregateGraph) -> Self {
        let mut entities = BTreeMap::new();
        for id in graph.reachable() {
            let node = graph.node(id);
            if let Some(key) = node.key() {
                entities
                    .entry(key)
                    .or_insert_with(|| entity_snapshot(graph, id));
            }
        }
        Self {
            root: graph.root().key(),
            entities,
        }
    }
}

fn non_null(fields: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    fields
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn child_snapshot(graph: &AggregateGraph, id: NodeId, path: &mut HashSet<NodeId>) -> ChildSnapshot {
    match graph.node(id).key() {
        Some(key) => ChildSnapshot::Entity(key),
        None => ChildSnapshot::Value(value_snapshot_inner(graph, id, path)),
    }
}

fn slots_snapshot(
    graph: &AggregateGraph,
    id: NodeId,
    path: &mut HashSet<NodeId>,
) -> BTreeMap<String, Vec<ChildSnapshot>> {
    let mut slots = BTreeMap::new();
    for (name, slot) in graph.node(id).slots() {
        if slot.is_empty() {
            continue;
        }
        let mut children: Vec<ChildSnapshot> = slot
            .ids()
            .into_iter()
            .map(|child| child_snapshot(graph, child, path))
            .collect();
        children.sort();
        slots.insert(name.clone(), children);
    }
    slots
}

fn value_snapshot_inner(
    graph: &AggregateGraph,
    id: NodeId,
    path: &mut HashSet<NodeId>,
) -> ValueSnapshot {
    let node = graph.node(id);
    // A value node linked into its own subtree has no finite content.
    if !path.insert(id) {
        return ValueSnapshot {
            type_name: node.type_name().to_string(),
            fields: BTreeMap::new(),
            slots: BTreeMap::new(),
        };
    }
    let snapshot = ValueSnapshot {
        type_name: node.type_name().to_string(),
        fields: non_null(node.fields()),
        slots: slots_snapshot(graph, id, path),
    };
    path.remove(&id);
    snapshot
}

/// Content fingerprint of a value object subtree.
pub fn value_snapshot(graph: &AggregateGraph, id: NodeId) -> ValueSnapshot {
    value_snapshot_inner(graph, id, &mut HashSet::new())
}

/// Content fingerprint of one entity (children by key, values by content).
pub fn entity_snapshot(graph: &AggregateGraph, id: NodeId) -> EntitySnapshot {
    let mut path = HashSet::new();
    path.insert(id);
    EntitySnapshot {
        fields: non_null(graph.node(id).fields()),
        slots: slots_snapshot(graph, id, &mut path),
    }
}

impl AggregateGraph {
    /// Structural equality with collections compared unordered.
    pub fn content_eq(&self, other: &AggregateGraph) -> bool {
        GraphSnapshot::of(self) == GraphSnapshot::of(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    fn tagged(tags: &[&str]) -> AggregateGraph {
        let mut graph = AggregateGraph::new("Order", 1);
        let root = graph.root_id();
        for tag in tags {
            graph.push_child(root, "tags", Node::value("Tag").with_field("label", *tag));
        }
        graph
    }

    #[test]
    fn collection_order_does_not_matter() {
        assert!(tagged(&["a", "b"]).content_eq(&tagged(&["b", "a"])));
        assert!(!tagged(&["a", "b"]).content_eq(&tagged(&["a", "c"])));
    }

    #[test]
    fn null_field_equals_missing_field() {
        let mut with_null = tagged(&[]);
        let root = with_null.root_id();
        with_null.node_mut(root).set_field("note", Value::Null);
        assert!(with_null.content_eq(&tagged(&[])));
    }

    #[test]
    fn empty_slots_are_ignored() {
        let mut graph = tagged(&[]);
        let root = graph.root_id();
        graph.set_link(root, "shipment", None);
        assert!(graph.content_eq(&tagged(&[])));
    }

    #[test]
    fn nested_value_change_changes_value_snapshot() {
        let mut graph = AggregateGraph::new("Order", 1);
        let root = graph.root_id();
        let address = graph.set_child(root, "address", Node::value("Address").with_field("city", "Oslo"));
        let geo = graph.set_child(address, "geo", Node::value("Geo").with_field("lat", 59));
        let before = value_snapshot(&graph, address);

        graph.node_mut(geo).set_field("lat", 60);
        assert_ne!(before, value_snapshot(&graph, address));
    }

    #[test]
    fn cyclic_entities_are_fingerprinted_by_key() {
        let mut graph = AggregateGraph::new("Catalog", 1);
        let root = graph.root_id();
        let a = graph.push_child(root, "categories", Node::entity("Category", "a"));
        graph.push_link(a, "children", a);
        let snapshot = GraphSnapshot::of(&graph);
        let key = EntityKey::new("Category", "a".into());
        assert_eq!(
            snapshot.entities[&key].slots["children"],
            vec![ChildSnapshot::Entity(key.clone())]
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: snapshots ignore collection order.
            #[test]
            fn shuffled_collections_fingerprint_equal(
                labels in proptest::collection::vec("[a-z]{1,6}", 0..12),
                seed in any::<u64>(),
            ) {
                let mut shuffled = labels.clone();
                let len = shuffled.len();
                if len > 1 {
                    let k = (seed as usize) % len;
                    shuffled.rotate_left(k);
                    shuffled.reverse();
                }
                let a: Vec<&str> = labels.iter().map(String::as_str).collect();
                let b: Vec<&str> = shuffled.iter().map(String::as_str).collect();
                prop_assert!(tagged(&a).content_eq(&tagged(&b)));
            }
        }
    }
}
