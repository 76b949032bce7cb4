//! Conflict resolution and content tag benchmarks.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use optidoc_bench::{increments, sets, wide_document};
use optidoc_codec::{VersionToken, VersionedDocument};
use optidoc_core::{ConflictResolver, ContentTag, IncomingWins, TimestampPolicy};
use std::sync::Arc;

/// Benchmark resolving increments (always kept).
fn bench_resolve_increments(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_increments");
    let resolver = ConflictResolver::new(Arc::new(IncomingWins));

    for width in [10usize, 100].iter() {
        let latest = VersionedDocument::new(wide_document(*width), VersionToken::new("t"));
        let ops = increments(*width);
        group.throughput(Throughput::Elements(*width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            b.iter(|| black_box(resolver.resolve(&latest, black_box(&ops), Utc::now()).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark resolving sets, half of which are already applied.
fn bench_resolve_sets(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_sets");
    let resolver = ConflictResolver::new(Arc::new(TimestampPolicy::new("lastUpdated")));

    for width in [10usize, 100].iter() {
        let doc = wide_document(*width).field("lastUpdated", Utc::now().to_rfc3339());
        let ops = sets(&doc, *width, true);
        let latest = VersionedDocument::new(doc, VersionToken::new("t"));
        group.throughput(Throughput::Elements(*width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            b.iter(|| black_box(resolver.resolve(&latest, black_box(&ops), Utc::now()).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark computing content tags.
fn bench_content_tag(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_tag");

    for width in [10usize, 100, 1000].iter() {
        let doc = wide_document(*width);
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            b.iter(|| black_box(ContentTag::of(black_box(&doc.fields)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_resolve_increments,
    bench_resolve_sets,
    bench_content_tag
);
criterion_main!(benches);
