use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use aggregraph_core::{
    AggregateGraph, CompositionDescriptor, CompositionPath, Identity, Node, ReferenceDescriptor,
    TypeDescriptor, TypeRegistry,
};
use aggregraph_events::{InMemoryEventBus, LifecycleEvent};
use aggregraph_infra::{AggregateRepository, InMemoryRecordStore};
use std::sync::Arc;

type Repo = AggregateRepository<InMemoryRecordStore, InMemoryEventBus<LifecycleEvent>>;

fn registry() -> Arc<TypeRegistry> {
    let types = TypeRegistry::builder()
        .register(
            TypeDescriptor::aggregate_root("Order", "id")
                .version("version")
                .field("customer")
                .reference(ReferenceDescriptor::many("lines", "OrderLine"))
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
                .reference(ReferenceDescriptor::many("allocations", "Allocation")),
        )
        .register(
            TypeDescriptor::entity("Allocation", "id")
                .field("bin")
                .field("qty")
                .foreign_key("line_id", "OrderLine"),
        )
        .register(
            TypeDescriptor::value_object("Tag")
                .field("label")
                .foreign_key("order_id", "Order"),
        )
        .build()
        .unwrap();
    Arc::new(types)
}

fn repository(types: &Arc<TypeRegistry>) -> Repo {
    let store = InMemoryRecordStore::for_registry(types);
    AggregateRepository::new(types.clone(), store, InMemoryEventBus::new(), "Order").unwrap()
}

/// Order with `lines` lines, two allocations per line and four tags.
fn order(lines: i64) -> AggregateGraph {
    let mut graph = AggregateGraph::from_root(Node::root("Order", 1).with_field("customer", "ada"));
    let root = graph.root_id();
    for i in 0..lines {
        let line = graph.push_child(
            root,
            "lines",
            Node::entity("OrderLine", i)
                .with_field("sku", format!("SKU-{i}"))
                .with_field("qty", 1),
        );
        for j in 0..2 {
            graph.push_child(
                line,
                "allocations",
                Node::entity("Allocation", i * 10 + j)
                    .with_field("bin", "A")
                    .with_field("qty", 1),
            );
        }
    }
    for label in ["gift", "rush", "fragile", "bulk"] {
        graph.push_child(root, "tags", Node::value("Tag").with_field("label", label));
    }
    graph
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_aggregate");
    let types = registry();

    for lines in [1i64, 10, 100].iter() {
        group.throughput(Throughput::Elements((*lines * 3 + 5) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, &lines| {
            let graph = order(lines);
            b.iter(|| {
                let repo = repository(&types);
                black_box(repo.insert(graph.clone()).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_fetch_deep(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch_deep");
    let types = registry();

    for lines in [1i64, 10, 100].iter() {
        let repo = repository(&types);
        repo.insert(order(*lines)).unwrap();
        let id = Identity::from(1);

        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, _| {
            b.iter(|| black_box(repo.fetch_deep(&id).unwrap()));
        });
    }

    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_aggregate");
    let types = registry();

    for lines in [10i64, 100].iter() {
        let repo = repository(&types);
        repo.insert(order(*lines)).unwrap();
        let stored = repo.fetch_deep(&Identity::from(1)).unwrap().unwrap();

        group.bench_with_input(BenchmarkId::new("unchanged", lines), lines, |b, _| {
            b.iter(|| black_box(repo.update(stored.clone()).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("one_scalar", lines), lines, |b, _| {
            let mut current = stored.clone();
            let mut qty = 1i64;
            b.iter(|| {
                qty += 1;
                let root = current.root_id();
                let line = current.node(root).children("lines")[0];
                current.node_mut(line).set_field("qty", qty);
                current = repo.update(current.clone()).unwrap();
                black_box(current.version());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_fetch_deep, bench_update);
criterion_main!(benches);
