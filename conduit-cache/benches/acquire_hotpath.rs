use conduit_cache::{FactoryRegistry, HandleProvider};
use conduit_core::{
    BackendError, CacheSettings, CallerIdentity, Credential, Destination, SchemeRegistry,
    SharedHandle,
};
use conduit_test_utils::MockHandle;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

fn bench_provider() -> HandleProvider {
    let factories = Arc::new(FactoryRegistry::new());
    // Bypassed handles are dropped right away instead of being retained.
    let file = |d: &Destination, id: &CallerIdentity| -> Result<SharedHandle, BackendError> {
        Ok(Arc::new(MockHandle::new(d.clone(), id.principal())))
    };
    factories
        .register("file", Arc::new(file))
        .expect("register file factory");
    let settings = CacheSettings::new()
        .with_alias("cachedfile", "file")
        .with_alias("uncachedfile", "file")
        .with_cache_disabled("uncachedfile", true);
    let registry = SchemeRegistry::from_settings(settings).expect("valid settings");
    HandleProvider::new(Arc::new(registry), factories)
}

fn bench_identity() -> CallerIdentity {
    let identity = CallerIdentity::new("bench").expect("principal");
    for i in 0..4u8 {
        identity
            .add_credential(Credential::new(
                "DELEGATION",
                "nn:8020",
                vec![i; 16],
                b"secret".to_vec(),
            ))
            .expect("add credential");
    }
    identity
}

fn bench_acquire(c: &mut Criterion) {
    let provider = bench_provider();
    let identity = bench_identity();
    let cached = Destination::parse("cachedfile://nn:8020/data").expect("destination");
    let uncached = Destination::parse("uncachedfile://nn:8020/data").expect("destination");

    provider
        .acquire_as(&cached, &identity)
        .expect("warm cache");

    c.bench_function("acquire/cached_hit", |b| {
        b.iter(|| {
            let handle = provider
                .acquire_as(black_box(&cached), &identity)
                .expect("cached acquire");
            black_box(handle);
        });
    });

    c.bench_function("acquire/bypass", |b| {
        b.iter(|| {
            let handle = provider
                .acquire_as(black_box(&uncached), &identity)
                .expect("bypass acquire");
            black_box(handle);
        });
    });

    c.bench_function("acquire/run_as_uri", |b| {
        b.iter(|| {
            let handle = identity
                .run_as(|| provider.acquire(black_box("cachedfile://nn:8020/logs")))
                .expect("scoped acquire");
            black_box(handle);
        });
    });
}

criterion_group!(benches, bench_acquire);
criterion_main!(benches);
