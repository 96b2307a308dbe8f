// Fan-out: several copies of one source under a single shared lease

use crate::leases::HeldLease;
use crate::monitor::{remove_source, watch_copy, LeasedCopyMonitor};
use crate::store::ObjectStore;
use crate::util::chunk_names;
use crate::{Error, Result};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Outcome of one destination in a fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyResult {
    pub destination: String,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutReport {
    pub source: String,
    pub copies: Vec<CopyResult>,
    /// Set only when every copy was created and the source was then removed
    pub source_deleted: bool,
}

impl FanOutReport {
    pub fn all_created(&self) -> bool {
        self.copies.iter().all(|copy| copy.created)
    }

    /// Destinations that now exist
    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.copies
            .iter()
            .filter(|copy| copy.created)
            .map(|copy| copy.destination.as_str())
    }
}

impl<S: ObjectStore + ?Sized> LeasedCopyMonitor<S> {
    /// Copies `source` to every destination concurrently under one lease.
    ///
    /// All copy loops share the lease and its renewal clock. A destination
    /// whose copy fails is reported with `created: false`; in that case the
    /// source is kept and the lease released. Any other error (a failed
    /// renewal above all) aborts every sibling copy loop and is returned.
    #[instrument(skip(self, destinations), fields(count = destinations.len()))]
    pub async fn fan_out(&self, source: &str, destinations: &[String]) -> Result<FanOutReport> {
        if destinations.is_empty() {
            return Err(Error::Config("fan-out needs at least one destination".to_string()));
        }

        let store = self.store().as_ref();
        let config = self.config();
        let lease =
            HeldLease::acquire(store, source, config.lease_duration, config.safety_margin).await?;

        let copies = try_join_all(destinations.iter().map(|destination| {
            let lease = &lease;
            async move {
                match watch_copy(store, config, lease, destination).await {
                    Ok(_) => Ok(CopyResult {
                        destination: destination.clone(),
                        created: true,
                    }),
                    Err(Error::CopyFailed { destination, .. }) => {
                        warn!(source, %destination, "Chunk copy failed");
                        Ok(CopyResult {
                            destination,
                            created: false,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
        }))
        .await?;

        let mut report = FanOutReport {
            source: source.to_string(),
            copies,
            source_deleted: false,
        };

        if report.all_created() {
            remove_source(store, lease).await?;
            report.source_deleted = true;
        } else {
            lease.release().await?;
        }

        info!(
            source,
            created = report.created().count(),
            source_deleted = report.source_deleted,
            "Fan-out finished"
        );
        Ok(report)
    }

    /// Fans `source` out into `count` chunks named `<stem>-<i><ext>`.
    pub async fn split(&self, source: &str, count: usize) -> Result<FanOutReport> {
        self.fan_out(source, &chunk_names(source, count)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorConfig;
    use crate::store::InMemoryStore;
    use bytes::Bytes;
    use std::sync::Arc;

    async fn monitor(store: &Arc<InMemoryStore>) -> LeasedCopyMonitor<InMemoryStore> {
        store
            .put("input.bin", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        LeasedCopyMonitor::new(Arc::clone(store), MonitorConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_split_creates_chunks_and_removes_source() {
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&store).await;

        let report = monitor.split("input.bin", 3).await.unwrap();
        assert!(report.all_created());
        assert!(report.source_deleted);
        assert_eq!(
            store.keys(),
            vec!["input-0.bin", "input-1.bin", "input-2.bin"]
        );
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_source() {
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&store).await;
        store.fail_copies_to("input-1.bin");

        let report = monitor.split("input.bin", 3).await.unwrap();
        assert!(!report.source_deleted);
        assert_eq!(
            report.created().collect::<Vec<_>>(),
            vec!["input-0.bin", "input-2.bin"]
        );
        assert!(store.exists("input.bin").await.unwrap());
        assert_eq!(store.active_lease("input.bin"), None);
        assert_eq!(store.stats().delete_calls, 0);
    }

    #[tokio::test]
    async fn test_empty_fan_out_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&store).await;
        let result = monitor.fan_out("input.bin", &[]).await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(store.active_lease("input.bin"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_lease_renewed_once_per_window() {
        let store = Arc::new(InMemoryStore::new().with_copy_latency(std::time::Duration::from_secs(58)));
        let monitor = monitor(&store).await;

        let report = monitor.split("input.bin", 5).await.unwrap();
        assert!(report.source_deleted);
        assert_eq!(store.stats().renew_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_failure_aborts_every_sibling() {
        let store = Arc::new(InMemoryStore::new().with_copy_latency(std::time::Duration::from_secs(120)));
        let monitor = monitor(&store).await;
        store.fail_renewals_after(0);
        let started = tokio::time::Instant::now();

        let result = monitor.split("input.bin", 3).await;
        assert!(matches!(result, Err(Error::RenewalFailed { .. })));
        // The first due poller failed the renewal; no sibling kept polling
        assert_eq!(started.elapsed(), std::time::Duration::from_secs(55));

        let stats = store.stats();
        assert_eq!(stats.copies_started, 3);
        assert_eq!(stats.renew_calls, 1);
        assert_eq!(stats.delete_calls, 0);
        assert_eq!(store.keys(), vec!["input.bin"]);
    }
}
