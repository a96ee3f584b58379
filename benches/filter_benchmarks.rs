//! Micro-benchmarks for the request hot path: pattern pre-screening,
//! response-cache key hashing, and in-memory cache operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use palisade::cache::{CacheConfig, MemoryCache};
use palisade::pipeline::response_cache::hash_base36;
use palisade::pipeline::FilterConfig;
use palisade::screening::PreScreener;

fn bench_prescreen(c: &mut Criterion) {
    let screener = PreScreener::new();
    let config = FilterConfig::default();

    let clean = "The quarterly report shows steady improvement across all regional teams \
                 and the projections for next year look encouraging overall.";
    let violating = "You can always reach me at 555-123-4567 or someone@example.com whenever.";

    c.bench_function("prescreen_clean_text", |b| {
        b.iter(|| screener.screen(black_box(clean), black_box(&config)))
    });

    c.bench_function("prescreen_violating_text", |b| {
        b.iter(|| screener.screen(black_box(violating), black_box(&config)))
    });
}

fn bench_cache_key(c: &mut Criterion) {
    let input = "/v1/filter|POST|credential|text=some moderately sized request body";

    c.bench_function("response_cache_key_hash", |b| {
        b.iter(|| hash_base36(black_box(input)))
    });
}

fn bench_memory_cache(c: &mut Criterion) {
    let cache = MemoryCache::new(CacheConfig::default());
    let value = "v".repeat(512);
    cache.set("warm", &value, None).unwrap();

    c.bench_function("memory_cache_get_hit", |b| {
        b.iter(|| cache.get::<String>(black_box("warm")))
    });

    c.bench_function("memory_cache_set", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = i.wrapping_add(1);
            cache.set(&format!("k{}", i % 1024), &value, None).unwrap();
        })
    });
}

criterion_group!(benches, bench_prescreen, bench_cache_key, bench_memory_cache);
criterion_main!(benches);
