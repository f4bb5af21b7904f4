use arbiter_core::canon::{canonical_sha256, to_canonical_json};
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

fn bench_canon(c: &mut Criterion) {
    let v = json!({
        "actionType": "ads.campaign.pause",
        "parameters": {"campaignId": "camp_123", "budget": {"daily": 250, "currency": "USD"}},
        "principalId": "agent-7",
        "cartridgeId": "ads-spend",
        "tags": ["q3", "retargeting", "brand"]
    });
    c.bench_function("to_canonical_json", |b| b.iter(|| to_canonical_json(&v)));
    c.bench_function("canonical_sha256", |b| b.iter(|| canonical_sha256(&v)));
}

criterion_group!(benches, bench_canon);
criterion_main!(benches);
