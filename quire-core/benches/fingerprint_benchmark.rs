use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quire_core::{fingerprint, ContentDocument};
use serde_json::json;

/// Document roughly the size of a real landing page.
fn sample_document(items: usize) -> ContentDocument {
    let catalog: Vec<_> = (0..items)
        .map(|i| {
            json!({
                "name": format!("Item {i}"),
                "price": i * 100,
                "tags": ["new", "featured"],
                "_iconCache": "blob:local",
            })
        })
        .collect();

    ContentDocument::new()
        .with_section("hero", json!({"title": "Welcome", "subtitle": "Fresh every day"}))
        .with_section("catalogItemsA", json!(catalog))
        .with_section("siteConfig", json!({"locale": "en", "currency": "EUR"}))
}

fn bench_fingerprint_small(c: &mut Criterion) {
    let doc = sample_document(10);
    c.bench_function("fingerprint_10_items", |b| {
        b.iter(|| black_box(fingerprint(black_box(&doc))))
    });
}

fn bench_fingerprint_large(c: &mut Criterion) {
    let doc = sample_document(1_000);
    c.bench_function("fingerprint_1k_items", |b| {
        b.iter(|| black_box(fingerprint(black_box(&doc))))
    });
}

criterion_group!(benches, bench_fingerprint_small, bench_fingerprint_large);
criterion_main!(benches);
