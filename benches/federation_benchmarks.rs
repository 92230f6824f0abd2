// SPDX-License-Identifier: PMPL-1.0-or-later
//! Performance benchmarks for Fedsearch federation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

use fedsearch_federation::{FederationConfig, Federator, Query, QueryRewriter, SourceRef};
use fedsearch_model::InMemorySource;
use serde_json::json;

fn sources(count: usize, items_each: usize) -> Vec<SourceRef> {
    (0..count)
        .map(|i| {
            SourceRef::from(Arc::new(InMemorySource::with_numbered_items(
                format!("source-{}", i),
                items_each,
            )))
        })
        .collect()
}

// ============================================================================
// Rewriter Benchmarks
// ============================================================================

fn bench_rewrite(c: &mut Criterion) {
    let rewriter = QueryRewriter::default();
    let query = Query::new(json!({ "any_text": "river" }))
        .with_start_index(41)
        .unwrap()
        .with_page_size(20);

    c.bench_function("rewriter/deep_page_8_sources", |b| {
        b.iter(|| black_box(rewriter.rewrite(black_box(&query), 8)))
    });
}

// ============================================================================
// Federation Benchmarks
// ============================================================================

fn bench_federate_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let federator = rt
        .block_on(async { Federator::new(FederationConfig::default()) })
        .unwrap();

    let mut group = c.benchmark_group("federate");

    for source_count in [1, 4, 16] {
        let fleet = sources(source_count, 100);
        group.throughput(Throughput::Elements(source_count as u64));
        group.bench_with_input(
            BenchmarkId::new("first_page", source_count),
            &fleet,
            |b, fleet| {
                b.to_async(&rt).iter(|| async {
                    let query = Query::new(json!(null)).with_page_size(20);
                    let response = federator.federate(fleet.clone(), query).unwrap();
                    black_box(response.collect().await)
                });
            },
        );
    }

    group.finish();
}

fn bench_federate_deep_page(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let federator = rt
        .block_on(async { Federator::new(FederationConfig::default()) })
        .unwrap();
    let fleet = sources(8, 500);

    c.bench_function("federate/deep_page_8_sources", |b| {
        b.to_async(&rt).iter(|| async {
            let query = Query::new(json!(null))
                .with_start_index(201)
                .unwrap()
                .with_page_size(50);
            let response = federator.federate(fleet.clone(), query).unwrap();
            black_box(response.collect().await)
        });
    });
}

criterion_group!(
    benches,
    bench_rewrite,
    bench_federate_fan_out,
    bench_federate_deep_page
);
criterion_main!(benches);
