use std::collections::HashMap;

use aggregraph_core::{
    AggregateGraph, EntityKey, NodeId, PersistError, PersistResult, TypeRegistry, entity_snapshot,
};

/// An owned-reference edge pointing at an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Edge {
    pub owner: NodeId,
    pub reference: String,
}

/// Identity index of one submitted graph.
///
/// Every entity key maps to the first node carrying it (pre-order); later
/// occurrences are folded onto that node. Incoming edges are collected per
/// key so the single row written for an entity gets every foreign key that
/// points at it.
#[derive(Debug, Default)]
pub(crate) struct GraphIndex {
    canonical: HashMap<EntityKey, NodeId>,
    incoming: HashMap<EntityKey, Vec<Edge>>,
    conflicts: Vec<EntityKey>,
}

impl GraphIndex {
    pub fn build(types: &TypeRegistry, graph: &AggregateGraph) -> PersistResult<Self> {
        let mut index = Self::default();
        let reachable = graph.reachable();

        for &id in &reachable {
            let Some(key) = graph.node(id).key() else {
                continue;
            };
            match index.canonical.get(&key) {
                None => {
                    index.canonical.insert(key, id);
                }
                Some(&first) => {
                    if entity_snapshot(graph, first) != entity_snapshot(graph, id)
                        && !index.conflicts.contains(&key)
                    {
                        index.conflicts.push(key);
                    }
                }
            }
        }

        for &id in &reachable {
            let node = graph.node(id);
            let Some(key) = node.key() else {
                continue;
            };
            if index.canonical.get(&key) != Some(&id) {
                continue;
            }
            let descriptor = types.get(node.type_name())?;
            for reference in descriptor.owned_references() {
                for child in node.children(&reference.name) {
                    let Some(child_key) = graph.node(child).key() else {
                        continue;
                    };
                    let edges = index.incoming.entry(child_key).or_default();
                    if !edges
                        .iter()
                        .any(|e| e.owner == id && e.reference == reference.name)
                    {
                        edges.push(Edge {
                            owner: id,
                            reference: reference.name.clone(),
                        });
                    }
                }
            }
        }

        Ok(index)
    }

    pub fn canonical(&self, key: &EntityKey) -> Option<NodeId> {
        self.canonical.get(key).copied()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.canonical.contains_key(key)
    }

    pub fn incoming(&self, key: &EntityKey) -> &[Edge] {
        self.incoming.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Fails if any identity occurs with differing content.
    pub fn check_consistency(&self) -> PersistResult<()> {
        if self.conflicts.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = self.conflicts.iter().map(ToString::to_string).collect();
        Err(PersistError::consistency(format!(
            "{} occur more than once with differing content",
            keys.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use aggregraph_core::{Identity, Node};

    use super::*;
    use crate::fixtures;

    #[test]
    fn shared_entity_collects_every_incoming_edge() {
        let types = fixtures::catalog_types();
        let graph = fixtures::shared_catalog(1);
        let index = GraphIndex::build(&types, &graph).unwrap();

        let b = EntityKey::new("Category", Identity::from("b"));
        let references: Vec<&str> = index
            .incoming(&b)
            .iter()
            .map(|e| e.reference.as_str())
            .collect();
        assert_eq!(references, vec!["categories", "children"]);
        assert!(index.check_consistency().is_ok());
    }

    #[test]
    fn identical_duplicates_fold_onto_first_occurrence() {
        let types = fixtures::catalog_types();
        let mut graph = fixtures::shared_catalog(1);
        let root = graph.root_id();
        let copy = graph.add(Node::entity("Category", "b").with_field("name", "Hammers"));
        graph.push_link(root, "categories", copy);

        let index = GraphIndex::build(&types, &graph).unwrap();
        let b = EntityKey::new("Category", Identity::from("b"));
        assert_ne!(index.canonical(&b), Some(copy));
        assert!(index.check_consistency().is_ok());
    }

    #[test]
    fn differing_duplicates_are_reported() {
        let types = fixtures::catalog_types();
        let mut graph = fixtures::shared_catalog(1);
        let root = graph.root_id();
        let copy = graph.add(Node::entity("Category", "b").with_field("name", "Nails"));
        graph.push_link(root, "categories", copy);

        let index = GraphIndex::build(&types, &graph).unwrap();
        assert!(matches!(
            index.check_consistency(),
            Err(PersistError::Consistency(_))
        ));
    }
}
