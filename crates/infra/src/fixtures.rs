//! Aggregates shared by the unit, integration and property tests.
//!
//! `Order` covers the common shapes: an entity collection with a nested
//! entity collection, a singular entity, a three-level value-object chain, a
//! value-object collection and an aggregate-root pointer. `Catalog` is
//! self-referential, which allows shared identities and cycles.

use std::sync::Arc;

use aggregraph_core::{
    AggregateGraph, CompositionDescriptor, CompositionPath, Node, ReferenceDescriptor,
    TypeDescriptor, TypeRegistry, Value,
};

pub(crate) fn order_types() -> TypeRegistry {
    TypeRegistry::builder()
        .register(TypeDescriptor::aggregate_root("Warehouse", "id").field("name"))
        .register(
            TypeDescriptor::aggregate_root("Order", "id")
                .version("version")
                .field("customer")
                .field("status")
                .reference(ReferenceDescriptor::root_pointer("warehouse", "Warehouse"))
                .reference(ReferenceDescriptor::many("lines", "OrderLine"))
                .reference(ReferenceDescriptor::one("shipment", "Shipment"))
                .composition(CompositionDescriptor::new(
                    "Address",
                    CompositionPath::new().one("billing"),
                ))
                .composition(CompositionDescriptor::new(
                    "Geo",
                    CompositionPath::new().one("billing").one("location"),
                ))
                .composition(CompositionDescriptor::new(
                    "Datum",
                    CompositionPath::new()
                        .one("billing")
                        .one("location")
                        .one("datum"),
                ))
                .composition(CompositionDescriptor::new(
                    "Tag",
                    CompositionPath::new().many("tags"),
                )),
        )
        .register(
            TypeDescriptor::entity("OrderLine", "id")
                .field("sku")
                .field("qty")
                .foreign_key("order_id", "Order")
                .reference(ReferenceDescriptor::many("allocations", "Allocation"))
                .composition(CompositionDescriptor::new(
                    "Money",
                    CompositionPath::new().one("price"),
                )),
        )
        .register(
            TypeDescriptor::entity("Allocation", "id")
                .field("bin")
                .field("qty")
                .foreign_key("line_id", "OrderLine"),
        )
        .register(
            TypeDescriptor::entity("Shipment", "id")
                .field("carrier")
                .unique("tracking")
                .foreign_key("order_id", "Order"),
        )
        .register(
            TypeDescriptor::value_object("Address")
                .field("street")
                .field("city")
                .foreign_key("order_id", "Order"),
        )
        .register(
            TypeDescriptor::value_object("Geo")
                .field("lat")
                .field("lng")
                .foreign_key("address_id", "Address"),
        )
        .register(
            TypeDescriptor::value_object("Datum")
                .field("name")
                .foreign_key("geo_id", "Geo"),
        )
        .register(
            TypeDescriptor::value_object("Tag")
                .field("label")
                .foreign_key("order_id", "Order"),
        )
        .register(
            TypeDescriptor::value_object("Money")
                .field("amount")
                .field("currency")
                .foreign_key("line_id", "OrderLine"),
        )
        .build()
        .expect("order fixture registry is valid")
}

pub(crate) fn order_registry() -> Arc<TypeRegistry> {
    Arc::new(order_types())
}

pub(crate) fn catalog_types() -> TypeRegistry {
    TypeRegistry::builder()
        .register(
            TypeDescriptor::aggregate_root("Catalog", "id")
                .version("version")
                .field("title")
                .reference(ReferenceDescriptor::many("categories", "Category")),
        )
        .register(
            TypeDescriptor::entity("Category", "id")
                .field("name")
                .reference(ReferenceDescriptor::many("children", "Category"))
                .foreign_key("catalog_id", "Catalog")
                .foreign_key("parent_id", "Category"),
        )
        .build()
        .expect("catalog fixture registry is valid")
}

pub(crate) fn catalog_registry() -> Arc<TypeRegistry> {
    Arc::new(catalog_types())
}

/// Line ids are `id * 100 + n`, allocation ids `id * 1000 + n` and the
/// shipment id `id * 100 + 50`, so several orders can share one store.
pub(crate) fn sample_order(id: i64) -> AggregateGraph {
    let mut graph = AggregateGraph::from_root(
        Node::root("Order", id)
            .with_field("customer", "ada")
            .with_field("status", "open")
            .with_field("warehouse", 7),
    );
    let root = graph.root_id();

    let first = graph.push_child(
        root,
        "lines",
        Node::entity("OrderLine", id * 100 + 1)
            .with_field("sku", "A-1")
            .with_field("qty", 2),
    );
    graph.push_child(
        first,
        "allocations",
        Node::entity("Allocation", id * 1000 + 1)
            .with_field("bin", "X1")
            .with_field("qty", 2),
    );
    graph.set_child(
        first,
        "price",
        Node::value("Money")
            .with_field("amount", 500)
            .with_field("currency", "EUR"),
    );

    let second = graph.push_child(
        root,
        "lines",
        Node::entity("OrderLine", id * 100 + 2)
            .with_field("sku", "B-2")
            .with_field("qty", 1),
    );
    graph.set_child(
        second,
        "price",
        Node::value("Money")
            .with_field("amount", 250)
            .with_field("currency", "EUR"),
    );

    graph.set_child(
        root,
        "shipment",
        Node::entity("Shipment", id * 100 + 50)
            .with_field("carrier", "dhl")
            .with_field("tracking", format!("T-{id}")),
    );

    let address = graph.set_child(
        root,
        "billing",
        Node::value("Address")
            .with_field("street", "Main 1")
            .with_field("city", "Berlin"),
    );
    let geo = graph.set_child(
        address,
        "location",
        Node::value("Geo").with_field("lat", 52).with_field("lng", 13),
    );
    graph.set_child(geo, "datum", Node::value("Datum").with_field("name", "WGS84"));

    graph.push_child(root, "tags", Node::value("Tag").with_field("label", "gift"));
    graph.push_child(root, "tags", Node::value("Tag").with_field("label", "rush"));
    graph
}

/// Catalog whose category `b` is both top-level and a child of `a`.
pub(crate) fn shared_catalog(id: i64) -> AggregateGraph {
    let mut graph =
        AggregateGraph::from_root(Node::root("Catalog", id).with_field("title", "spring"));
    let root = graph.root_id();
    let a = graph.push_child(
        root,
        "categories",
        Node::entity("Category", "a").with_field("name", "Tools"),
    );
    let b = graph.push_child(
        a,
        "children",
        Node::entity("Category", "b").with_field("name", "Hammers"),
    );
    graph.push_link(root, "categories", b);
    graph
}

/// Catalog holding one chain of `length` categories, each the only child of
/// the one before. The last category sits `length` entities below the root.
pub(crate) fn category_chain(id: i64, length: usize) -> AggregateGraph {
    let mut graph =
        AggregateGraph::from_root(Node::root("Catalog", id).with_field("title", "chain"));
    let mut owner = graph.root_id();
    let mut slot = "categories";
    for n in 0..length {
        owner = graph.push_child(
            owner,
            slot,
            Node::entity("Category", Value::from(format!("c{n}")))
                .with_field("name", format!("level {n}")),
        );
        slot = "children";
    }
    graph
}
