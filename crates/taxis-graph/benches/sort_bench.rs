use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use taxis_graph::DependencyGraph;

fn chain_graph(len: usize) -> DependencyGraph<usize> {
    let mut graph = DependencyGraph::new();
    graph.add(0, (), [], []);
    for key in 1..len {
        graph.add(key, (), [key - 1], []);
    }
    graph
}

fn bench_sorted(c: &mut Criterion) {
    let mut group = c.benchmark_group("Dependency Sort");

    group.bench_function("Cold sort (1k chain)", |b| {
        b.iter_batched(
            || chain_graph(1_000),
            |mut graph| {
                black_box(graph.sorted().unwrap().len());
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("Cached re-sort (1k chain)", |b| {
        let mut graph = chain_graph(1_000);
        graph.sorted().unwrap();
        b.iter(|| {
            black_box(graph.sorted().unwrap().len());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_sorted);
criterion_main!(benches);
