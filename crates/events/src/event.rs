use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use aggregraph_core::{AggregateGraph, Identity, Node, NodeId, Value};

/// What happened to a persisted node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Inserted,
    Updated,
    Deleted,
}

impl EventKind {
    /// Stable event name (e.g. "inserted").
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Inserted => "inserted",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detached description of a domain object at the time of the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub type_name: String,
    pub identity: Option<Identity>,
    pub fields: BTreeMap<String, Value>,
}

impl ObjectRef {
    pub fn of(node: &Node) -> Self {
        Self {
            type_name: node.type_name().to_string(),
            identity: node.identity().cloned(),
            fields: node.fields().clone(),
        }
    }

    pub fn in_graph(graph: &AggregateGraph, id: NodeId) -> Self {
        Self::of(graph.node(id))
    }
}

impl core::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.identity {
            Some(id) => write!(f, "{}#{}", self.type_name, id),
            None => f.write_str(&self.type_name),
        }
    }
}

/// One lifecycle notification, emitted per mutated node.
///
/// Events are delivered after the mutation batch commits, in the exact order
/// the persister planned them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_id: Uuid,
    pub kind: EventKind,
    /// Identity of the aggregate root the object belongs to.
    pub aggregate: Identity,
    pub object: ObjectRef,
    /// Direct owner, absent for the root.
    pub owner: Option<ObjectRef>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        kind: EventKind,
        aggregate: Identity,
        object: ObjectRef,
        owner: Option<ObjectRef>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            kind,
            aggregate,
            object,
            owner,
            occurred_at: Utc::now(),
        }
    }

    /// Short `kind Type#id` label; handy for asserting event order.
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.object)
    }

    /// JSON payload for transports that carry untyped messages.
    pub fn to_payload(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_names_kind_type_and_identity() {
        let event = LifecycleEvent::new(
            EventKind::Inserted,
            Identity::from(1),
            ObjectRef::of(&Node::entity("OrderLine", 10)),
            None,
        );
        assert_eq!(event.label(), "inserted OrderLine#10");

        let value = LifecycleEvent::new(
            EventKind::Deleted,
            Identity::from(1),
            ObjectRef::of(&Node::value("Money")),
            None,
        );
        assert_eq!(value.label(), "deleted Money");
    }

    #[test]
    fn payload_carries_kind_and_object() {
        let event = LifecycleEvent::new(
            EventKind::Updated,
            Identity::from(1),
            ObjectRef::of(&Node::root("Order", 1).with_field("customer", "ada")),
            None,
        );
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["kind"], "updated");
        assert_eq!(payload["object"]["type_name"], "Order");
    }
}
