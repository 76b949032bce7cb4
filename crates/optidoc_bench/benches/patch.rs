//! Field operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use optidoc_bench::{increments, sets, wide_document};
use optidoc_codec::FieldOperation;

/// Benchmark applying batches of increments.
fn bench_apply_increments(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_increments");

    for width in [1usize, 10, 100].iter() {
        let doc = wide_document(*width);
        let ops = increments(*width);
        group.throughput(Throughput::Elements(*width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            b.iter(|| {
                let patched = black_box(&doc).patched(black_box(&ops)).unwrap();
                black_box(patched);
            });
        });
    }

    group.finish();
}

/// Benchmark applying batches of sets.
fn bench_apply_sets(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_sets");

    for width in [10usize, 100].iter() {
        let doc = wide_document(*width);
        let ops = sets(&doc, *width, false);
        group.throughput(Throughput::Elements(*width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            b.iter(|| {
                let patched = black_box(&doc).patched(black_box(&ops)).unwrap();
                black_box(patched);
            });
        });
    }

    group.finish();
}

/// Benchmark nested path operations.
fn bench_nested(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested");
    let doc = wide_document(10);

    group.bench_function("set_nested", |b| {
        let ops = vec![FieldOperation::set("/address/city", "Porto").unwrap()];
        b.iter(|| black_box(doc.patched(black_box(&ops)).unwrap()));
    });

    group.bench_function("move_nested", |b| {
        let ops = vec![FieldOperation::move_value("/address/zip", "/zip").unwrap()];
        b.iter(|| black_box(doc.patched(black_box(&ops)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_apply_increments, bench_apply_sets, bench_nested);
criterion_main!(benches);
