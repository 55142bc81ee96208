//! Benchmark tests for path resolution and enumeration.

use cardwire_core::path::{available_paths, resolve, DataPath};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

fn payload() -> Value {
    let readings: Vec<Value> = (0..50)
        .map(|i| json!({"ts": i, "value": f64::from(i) * 0.5, "tags": {"unit": "C"}}))
        .collect();
    json!({"device": {"id": "dev-1", "readings": readings}, "status": "ok"})
}

fn bench_resolve(c: &mut Criterion) {
    let data = payload();

    c.bench_function("resolve_nested_index", |b| {
        b.iter(|| resolve(black_box(&data), black_box("device.readings[42].tags.unit")))
    });
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_path", |b| {
        b.iter(|| DataPath::parse(black_box("device.readings[42].tags.unit")))
    });
}

fn bench_available_paths(c: &mut Criterion) {
    let data = payload();

    c.bench_function("available_paths", |b| {
        b.iter(|| available_paths(black_box(&data)))
    });
}

criterion_group!(benches, bench_resolve, bench_parse, bench_available_paths);
criterion_main!(benches);
