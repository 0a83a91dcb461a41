use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use repokit::{CacheTagIndex, FilterCondition, Model, ModelDescriptor, MokaCacheBackend, SearchSpec};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    id: i64,
    status: String,
    total: i64,
}

impl Model for Order {
    const NAME: &'static str = "Order";
    const TABLE: &'static str = "orders";
}

fn search_of(size: usize) -> SearchSpec {
    (0..size).fold(SearchSpec::new(), |search, i| {
        if i % 2 == 0 {
            search.with(&format!("column_{i}"), i)
        } else {
            search.with(&format!("column_{i}"), json!([">=", i]))
        }
    })
}

fn bench_derive_key(c: &mut Criterion) {
    let index = CacheTagIndex::for_model(&ModelDescriptor::of::<Order>());
    let mut group = c.benchmark_group("derive_key");

    for size in [1usize, 8, 32] {
        let search = search_of(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &search, |b, search| {
            b.iter(|| index.derive_key(black_box(search), "all").unwrap());
        });
    }

    group.finish();
}

fn bench_derive_condition_key(c: &mut Criterion) {
    let index = CacheTagIndex::for_model(&ModelDescriptor::of::<Order>());
    let conditions = FilterCondition::parse_list(&json!([
        ["total", "between", [100, 500]],
        ["status", "in", ["paid", "shipped"]],
        ["deleted_at", "is null"],
        ["customer", "like", "acme"],
    ]))
    .unwrap();

    c.bench_function("derive_condition_key", |b| {
        b.iter(|| index.derive_condition_key(black_box(&conditions), "first"));
    });
}

fn bench_remember_hit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let index = CacheTagIndex::for_model(&ModelDescriptor::of::<Order>());
    let cache = MokaCacheBackend::default();
    let ttl = Duration::from_secs(300);
    let key = index.derive_key(&search_of(4), "all").unwrap();
    let orders: Vec<Order> = (0..50)
        .map(|id| Order {
            id,
            status: "paid".to_string(),
            total: id * 10,
        })
        .collect();

    runtime.block_on(async {
        index.put(&cache, &key, &orders, ttl).await.unwrap();
    });

    c.bench_function("remember_hit", |b| {
        b.to_async(&runtime).iter(|| async {
            let hit: Vec<Order> = index
                .remember(&cache, black_box(&key), ttl, || async {
                    Ok(Vec::new())
                })
                .await
                .unwrap();
            black_box(hit)
        });
    });
}

criterion_group!(
    benches,
    bench_derive_key,
    bench_derive_condition_key,
    bench_remember_hit
);
criterion_main!(benches);
