use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::{Builder, Runtime};

use blobmover::monitor::{LeasedCopyMonitor, MonitorConfig};
use blobmover::store::{InMemoryStore, ObjectStore};

// Paused clock: poll sleeps and copy latency cost no wall time
fn paused_runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

async fn seeded_monitor(latency: Duration) -> LeasedCopyMonitor<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new().with_copy_latency(latency));
    store
        .put("input.bin", Bytes::from(vec![7u8; 1024]))
        .await
        .unwrap();
    LeasedCopyMonitor::new(store, MonitorConfig::default()).unwrap()
}

fn copy_benchmark(c: &mut Criterion) {
    let rt = paused_runtime();

    c.bench_function("leased copy, immediate", |b| {
        b.iter(|| {
            rt.block_on(async {
                let monitor = seeded_monitor(Duration::ZERO).await;
                monitor
                    .copy_with_lease("input.bin", "new-input.bin")
                    .await
                    .unwrap();
            })
        })
    });

    c.bench_function("leased copy, 10 min with renewals", |b| {
        b.iter(|| {
            rt.block_on(async {
                let monitor = seeded_monitor(Duration::from_secs(600)).await;
                monitor
                    .copy_with_lease("input.bin", "new-input.bin")
                    .await
                    .unwrap();
            })
        })
    });

    c.bench_function("split into 5 chunks", |b| {
        b.iter(|| {
            rt.block_on(async {
                let monitor = seeded_monitor(Duration::from_secs(30)).await;
                monitor.split("input.bin", 5).await.unwrap();
            })
        })
    });
}

criterion_group!(benches, copy_benchmark);
criterion_main!(benches);
