use criterion::{black_box, criterion_group, criterion_main, Criterion};
use motif_host::engine::MatchEngine;
use motif_host::graph::HostGraph;
use motif_host::Motif;
use std::fmt::Write;
use std::sync::Arc;

// Ring lattice: every node points at its next three neighbours, so triangles and paths abound.
fn lattice(n: usize) -> HostGraph {
    let mut text = String::new();
    for i in 0..n {
        for step in 1..=3 {
            let _ = writeln!(text, "n{i} n{} weight={}", (i + step) % n, (i * 7 + step) % 20);
        }
    }
    HostGraph::from_bytes(text.as_bytes()).expect("lattice graph")
}

fn bench_engine(c: &mut Criterion) {
    let engine = MatchEngine::new(Arc::new(lattice(2_000)));
    let path = Motif::parse("A -> B\nB -> C").expect("path motif");
    let triangle = Motif::parse("A -> B\nB -> C\nA -> C").expect("triangle motif");
    let constrained = Motif::parse("A -> B [weight >= 15]\nB -> C [weight >= 15]\nC !> A").expect("constrained motif");

    c.bench_function("engine_path_2k", |b| b.iter(|| black_box(engine.find(&path).len())));
    c.bench_function("engine_triangle_2k", |b| b.iter(|| black_box(engine.find(&triangle).len())));
    c.bench_function("engine_constrained_2k", |b| b.iter(|| black_box(engine.find(&constrained).len())));
    c.bench_function("engine_first_100", |b| b.iter(|| black_box(engine.find_limited(&path, Some(100)).len())));
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
