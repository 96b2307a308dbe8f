use blobmover::prelude::*;
use futures_util::future::join_all;
use tempfile::TempDir;

async fn setup_store(tmp_dir: &TempDir) -> Arc<FsStore> {
    let store = FsStore::open(tmp_dir.path())
        .await
        .expect("Could not open store");
    store
        .put("input.bin", Bytes::from_static(b"file payload"))
        .await
        .unwrap();
    Arc::new(store)
}

fn fast_config() -> MonitorConfig {
    MonitorConfig::new(
        Duration::from_secs(15),
        Duration::from_secs(5),
        Duration::from_millis(20),
    )
    .unwrap()
}

#[tokio::test]
async fn test_leased_copy_on_disk() {
    let tmp_dir = TempDir::new().unwrap();
    let store = setup_store(&tmp_dir).await;
    store.snapshot("input.bin").await.unwrap();

    let monitor = LeasedCopyMonitor::new(Arc::clone(&store), fast_config()).unwrap();
    let report = monitor
        .copy_with_lease("input.bin", "new-input.bin")
        .await
        .unwrap();

    assert_eq!(report.renewals, 0);
    assert_eq!(store.list().await.unwrap(), vec!["new-input.bin"]);
    assert_eq!(store.snapshot_count("input.bin").await.unwrap(), 0);
    assert!(!tmp_dir.path().join(".leases/input.bin").exists());
}

#[tokio::test]
async fn test_lease_held_by_another_handle() {
    let tmp_dir = TempDir::new().unwrap();
    let store = setup_store(&tmp_dir).await;
    let other = FsStore::open(tmp_dir.path()).await.unwrap();
    let lease = other
        .acquire_lease("input.bin", Duration::from_secs(60))
        .await
        .unwrap();

    let monitor = LeasedCopyMonitor::new(Arc::clone(&store), fast_config()).unwrap();
    let result = monitor.copy_with_lease("input.bin", "new-input.bin").await;
    assert!(matches!(result, Err(Error::LeaseUnavailable { .. })));
    assert!(store.exists("input.bin").await.unwrap());

    other.release_lease("input.bin", lease).await.unwrap();
    monitor
        .copy_with_lease("input.bin", "new-input.bin")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_job_on_disk_with_error_reports() {
    let tmp_dir = TempDir::new().unwrap();
    let store = setup_store(&tmp_dir).await;

    let settings = Settings::from_json(
        r#"{"lease_duration_secs": 15, "poll_interval_ms": 20, "chunk_count": 2}"#,
    )
    .unwrap();
    let runner = JobRunner::from_settings(Arc::clone(&store), &settings).unwrap();

    let report = runner.run("input.bin").await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        store.list().await.unwrap(),
        vec!["new-input-0.bin", "new-input-1.bin"]
    );

    // A second run has no source left; the failure lands in the container
    let result = runner.run("input.bin").await;
    assert!(matches!(result, Err(Error::ObjectNotFound { .. })));

    let reports: Vec<String> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|key| key.ends_with("-errors.json"))
        .collect();
    assert_eq!(reports.len(), 1);

    let body = store.get(&reports[0]).await.unwrap().unwrap();
    let written: ErrorReport = serde_json::from_slice(&body).unwrap();
    assert_eq!(written.kind, "ObjectNotFound");
}

/// Races `contenders` handles, each with its own `FsStore`, for a lease on
/// `key`. Returns the number of winners; every loser must see the lease as held.
async fn race_for_lease(root: &Path, key: &str, contenders: usize) -> usize {
    let attempts = (0..contenders).map(|_| {
        let root = root.to_path_buf();
        let key = key.to_string();
        tokio::spawn(async move {
            let store = FsStore::open(&root).await.unwrap();
            store.acquire_lease(&key, Duration::from_secs(60)).await
        })
    });

    let mut winners = 0;
    for outcome in join_all(attempts).await {
        match outcome.unwrap() {
            Ok(_) => winners += 1,
            Err(Error::LeaseAlreadyPresent { .. }) => {}
            Err(e) => panic!("unexpected error while contending for {key}: {e}"),
        }
    }
    winners
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_has_one_winner() {
    let tmp_dir = TempDir::new().unwrap();
    let store = FsStore::open(tmp_dir.path()).await.unwrap();

    for round in 0..25 {
        let key = format!("input-{round}.bin");
        store.put(&key, Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(race_for_lease(tmp_dir.path(), &key, 8).await, 1, "round {round}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_takeover_of_expired_lease_has_one_winner() {
    let tmp_dir = TempDir::new().unwrap();
    let store = FsStore::open(tmp_dir.path()).await.unwrap();

    for round in 0..25 {
        let key = format!("input-{round}.bin");
        store.put(&key, Bytes::from_static(b"x")).await.unwrap();
        store
            .acquire_lease(&key, Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(race_for_lease(tmp_dir.path(), &key, 8).await, 1, "round {round}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_renewals_never_expose_partial_records() {
    let tmp_dir = TempDir::new().unwrap();
    let store = Arc::new(FsStore::open(tmp_dir.path()).await.unwrap());
    store.put("input.bin", Bytes::from_static(b"x")).await.unwrap();
    let lease = store
        .acquire_lease("input.bin", Duration::from_secs(60))
        .await
        .unwrap();

    let renewer = tokio::spawn({
        let store = Arc::clone(&store);
        async move {
            for _ in 0..200 {
                store.renew_lease("input.bin", lease).await.unwrap();
            }
        }
    });

    // Readers in another handle always parse a whole record
    let reader = FsStore::open(tmp_dir.path()).await.unwrap();
    while !renewer.is_finished() {
        let contended = reader.acquire_lease("input.bin", Duration::from_secs(60)).await;
        assert!(matches!(contended, Err(Error::LeaseAlreadyPresent { .. })));
    }
    renewer.await.unwrap();
}
