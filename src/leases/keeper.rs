// Held lease shared by one or more copy loops over the same source

use super::{LeaseHandle, RenewalClock};
use crate::store::{LeaseId, ObjectStore};
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug)]
struct LeaseState {
    handle: LeaseHandle,
    clock: RenewalClock,
}

/// A lease acquired on a source object together with its renewal clock
///
/// Concurrent pollers share one instance; the state lock is held across the
/// renewal call so a due lease is renewed once, and the clock resets only
/// after the store confirmed the renewal.
#[derive(Debug)]
pub struct HeldLease<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    id: LeaseId,
    key: String,
    state: Mutex<LeaseState>,
}

impl<'a, S: ObjectStore + ?Sized> HeldLease<'a, S> {
    /// Acquires a lease on `key`, mapping contention to `LeaseUnavailable`.
    pub async fn acquire(
        store: &'a S,
        key: &str,
        duration: Duration,
        safety_margin: Duration,
    ) -> Result<Self> {
        let id = store
            .acquire_lease(key, duration)
            .await
            .map_err(|e| match e {
                Error::LeaseAlreadyPresent { key } => Error::LeaseUnavailable { key },
                other => other,
            })?;

        let clock = match RenewalClock::start(duration, safety_margin) {
            Ok(clock) => clock,
            Err(e) => {
                if let Err(release_err) = store.release_lease(key, id).await {
                    warn!(key, lease = %id, error = %release_err, "Could not release lease after invalid timing");
                }
                return Err(e);
            }
        };

        debug!(key, lease = %id, ?duration, "Lease acquired");

        Ok(Self {
            store,
            id,
            key: key.to_string(),
            state: Mutex::new(LeaseState {
                handle: LeaseHandle::new(id, key, duration),
                clock,
            }),
        })
    }

    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Renews the lease if the renewal clock says it is due.
    ///
    /// Returns whether a renewal happened. A failed renewal is reported as
    /// `RenewalFailed` and is never retried.
    pub async fn renew_if_due(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.clock.is_due() {
            return Ok(false);
        }

        let elapsed = state.clock.elapsed();
        self.store
            .renew_lease(&self.key, self.id)
            .await
            .map_err(|e| Error::RenewalFailed {
                key: self.key.clone(),
                source: Box::new(e),
            })?;

        state.clock.reset();
        state.handle.record_renewal();
        debug!(key = %self.key, lease = %self.id, ?elapsed, renewals = state.clock.renewals(), "Lease renewed");
        Ok(true)
    }

    /// Time left before the lease must be renewed.
    pub async fn until_due(&self) -> Duration {
        self.state.lock().await.clock.until_due()
    }

    pub async fn renewals(&self) -> u32 {
        self.state.lock().await.clock.renewals()
    }

    /// Releases the lease and hands back the handle for inspection.
    pub async fn release(self) -> Result<LeaseHandle> {
        self.store.release_lease(&self.key, self.id).await?;
        debug!(key = %self.key, lease = %self.id, "Lease released");
        Ok(self.state.into_inner().handle)
    }

    /// Stops tracking the lease without releasing it; it expires on its own.
    pub fn abandon(self) -> LeaseHandle {
        self.state.into_inner().handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use bytes::Bytes;

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .put("input.bin", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_contention_maps_to_unavailable() {
        let store = seeded_store().await;
        let held = HeldLease::acquire(&store, "input.bin", Duration::from_secs(60), Duration::from_secs(5))
            .await
            .unwrap();

        let second =
            HeldLease::acquire(&store, "input.bin", Duration::from_secs(60), Duration::from_secs(5)).await;
        assert!(matches!(second, Err(Error::LeaseUnavailable { .. })));

        held.release().await.unwrap();
        assert_eq!(store.active_lease("input.bin"), None);
    }

    #[tokio::test]
    async fn test_invalid_margin_releases_lease() {
        let store = seeded_store().await;
        let result =
            HeldLease::acquire(&store, "input.bin", Duration::from_secs(60), Duration::from_secs(60)).await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(store.active_lease("input.bin"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renews_only_when_due() {
        let store = seeded_store().await;
        let held = HeldLease::acquire(&store, "input.bin", Duration::from_secs(60), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!held.renew_if_due().await.unwrap());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(held.renew_if_due().await.unwrap());
        assert!(!held.renew_if_due().await.unwrap());

        assert_eq!(held.renewals().await, 1);
        assert_eq!(store.stats().renew_calls, 1);
        assert_eq!(held.abandon().renewal_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_is_fatal() {
        let store = seeded_store().await;
        store.fail_renewals_after(0);
        let held = HeldLease::acquire(&store, "input.bin", Duration::from_secs(60), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(55)).await;
        let result = held.renew_if_due().await;
        assert!(matches!(result, Err(Error::RenewalFailed { .. })));
        assert_eq!(held.renewals().await, 0);
    }
}
