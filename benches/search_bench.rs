//! Benchmarks for indexing throughput and search latency.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ferrodex::{EngineConfig, Query, SearchEngine};
use serde_json::json;
use std::collections::HashMap;
use tempfile::TempDir;

const TECHNICAL_WORDS: &[&str] = &[
    "rust", "programming", "search", "index", "query", "posting", "dictionary", "bm25",
    "relevance", "tokenizer", "analyzer", "wildcard", "ranking", "document", "field",
];

fn lorem_title(seed: usize) -> String {
    let mut words = Vec::with_capacity(8);
    for i in 0..8 {
        words.push(TECHNICAL_WORDS[(seed + i) % TECHNICAL_WORDS.len()]);
    }
    words.join(" ")
}

fn engine_with_docs(n: usize) -> (TempDir, SearchEngine) {
    let dir = TempDir::new().unwrap();
    let engine = SearchEngine::open_at(dir.path(), EngineConfig::for_testing()).unwrap();
    engine.create_index("bench", HashMap::new(), Default::default()).unwrap();
    for i in 0..n {
        engine
            .index_document("bench", Some(i.to_string()), json!({"title": lorem_title(i), "year": 2000 + (i % 24)}))
            .unwrap();
    }
    (dir, engine)
}

fn bench_indexing(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_document");
    for &size in &[100usize, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let engine = SearchEngine::open_at(dir.path(), EngineConfig::for_testing()).unwrap();
                engine.create_index("bench", HashMap::new(), Default::default()).unwrap();
                for i in 0..size {
                    engine
                        .index_document("bench", Some(i.to_string()), json!({"title": lorem_title(i)}))
                        .unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    for &size in &[100usize, 1_000] {
        let (_dir, engine) = engine_with_docs(size);
        let query = Query::from_json(&json!({"match": {"value": "rust search"}})).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(engine.search("bench", &query, 0, 10, None).unwrap()));
        });
    }
    group.finish();
}

fn bench_wildcard(c: &mut Criterion) {
    let (_dir, engine) = engine_with_docs(1_000);
    let query = Query::from_json(&json!({"wildcard": {"field": "_all", "value": "rus*"}})).unwrap();

    c.bench_function("wildcard_search_1000_docs", |b| {
        b.iter(|| black_box(engine.search("bench", &query, 0, 10, None).unwrap()));
    });
}

criterion_group!(benches, bench_indexing, bench_search, bench_wildcard);
criterion_main!(benches);
