//! `aggregraph-core`: aggregate graph building blocks.
//!
//! This crate contains the **pure** data model of the persistence kernel
//! (no IO): identities and values, the arena object graph, content
//! snapshots, flat records and the static type-descriptor table.

pub mod aggregate;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod id;
pub mod record;
pub mod snapshot;

pub use aggregate::{ExpectedVersion, VersionGuard, next_version};
pub use descriptor::{
    CompositionDescriptor, CompositionPath, DescriptorKind, ForeignKey, Multiplicity,
    PathSegment, ReferenceDescriptor, ReferenceKind, TypeDescriptor, TypeRegistry,
    TypeRegistryBuilder,
};
pub use error::{PersistError, PersistResult, StorageError};
pub use graph::{AggregateGraph, Node, NodeId, NodeKind, Slot};
pub use id::{EntityKey, Identity, Value};
pub use record::{Record, RecordId};
pub use snapshot::{
    ChildSnapshot, EntitySnapshot, GraphSnapshot, ValueSnapshot, entity_snapshot, value_snapshot,
};
