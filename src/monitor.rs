//! Leased copy monitor.
//!
//! Copies a source object to a destination with a server-side copy while a
//! lease on the source keeps other writers out. The lease is renewed from
//! the polling loop whenever the renewal clock reaches `lease_duration -
//! safety_margin`. After a successful copy the source (with its snapshots)
//! is deleted under the lease and the lease is released.
//!
//! ```no_run
//! # async fn demo() -> blobmover::Result<()> {
//! use blobmover::{monitor::copy_with_lease, store::InMemoryStore};
//! use std::time::Duration;
//!
//! let store = InMemoryStore::new();
//! copy_with_lease(
//!     &store,
//!     "input.bin",
//!     "new-input.bin",
//!     Duration::from_secs(60),
//!     Duration::from_secs(5),
//!     Duration::from_millis(500),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::leases::HeldLease;
use crate::store::{CopyStatus, DeleteSnapshots, ObjectStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub use crate::leases::lease::DEFAULT_LEASE_DURATION;

/// Margin left before lease expiry when a renewal is forced
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(5);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shortest finite lease a blob store grants
pub const MIN_LEASE_DURATION: Duration = Duration::from_secs(15);

/// Longest finite lease a blob store grants
pub const MAX_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Timing parameters of the copy monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub lease_duration: Duration,
    pub safety_margin: Duration,
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl MonitorConfig {
    /// Builds a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the lease duration is outside
    /// `[15s, 60s]`, the margin is not in `(0, lease_duration)`, or the poll
    /// interval is zero.
    pub fn new(
        lease_duration: Duration,
        safety_margin: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let config = Self {
            lease_duration,
            safety_margin,
            poll_interval,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease_duration < MIN_LEASE_DURATION || self.lease_duration > MAX_LEASE_DURATION {
            return Err(Error::Config(format!(
                "lease duration {:?} must be between {:?} and {:?}",
                self.lease_duration, MIN_LEASE_DURATION, MAX_LEASE_DURATION
            )));
        }
        if self.safety_margin.is_zero() || self.safety_margin >= self.lease_duration {
            return Err(Error::Config(format!(
                "safety margin {:?} must be positive and shorter than the lease duration {:?}",
                self.safety_margin, self.lease_duration
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }
        Ok(())
    }
}

/// Outcome of a successful leased copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyReport {
    pub source: String,
    pub destination: String,
    pub renewals: u32,
    pub polls: u32,
}

/// Runs leased copies against one store with one configuration.
#[derive(Debug)]
pub struct LeasedCopyMonitor<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    config: MonitorConfig,
}

impl<S: ObjectStore + ?Sized> Clone for LeasedCopyMonitor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
        }
    }
}

impl<S: ObjectStore + ?Sized> LeasedCopyMonitor<S> {
    pub fn new(store: Arc<S>, config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Copies `source` to `destination` under a lease on the source.
    ///
    /// # Errors
    ///
    /// - `LeaseUnavailable` if the source is leased by someone else
    /// - `CopyFailed` if the backend reports the copy failed; the source is
    ///   left leased and untouched
    /// - `RenewalFailed` if the lease could not be extended; nothing is deleted
    /// - `DeleteFailed` if the copy succeeded but the source could not be removed
    pub async fn copy_with_lease(&self, source: &str, destination: &str) -> Result<CopyReport> {
        leased_copy(self.store.as_ref(), &self.config, source, destination).await
    }
}

/// Single-call form of [`LeasedCopyMonitor::copy_with_lease`].
pub async fn copy_with_lease<S: ObjectStore + ?Sized>(
    store: &S,
    source: &str,
    destination: &str,
    lease_duration: Duration,
    safety_margin: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let config = MonitorConfig::new(lease_duration, safety_margin, poll_interval)?;
    leased_copy(store, &config, source, destination).await?;
    Ok(())
}

#[instrument(skip(store, config), fields(lease = ?config.lease_duration))]
async fn leased_copy<S: ObjectStore + ?Sized>(
    store: &S,
    config: &MonitorConfig,
    source: &str,
    destination: &str,
) -> Result<CopyReport> {
    let lease =
        HeldLease::acquire(store, source, config.lease_duration, config.safety_margin).await?;

    // On any error below the lease is dropped unreleased and expires on its own
    let polls = watch_copy(store, config, &lease, destination).await?;
    let renewals = lease.renewals().await;

    remove_source(store, lease).await?;

    info!(source, destination, renewals, polls, "Copy complete, source removed");
    Ok(CopyReport {
        source: source.to_string(),
        destination: destination.to_string(),
        renewals,
        polls,
    })
}

/// Starts a copy from the leased source and polls it to a terminal status,
/// renewing the lease while it is pending. A poll is cut short when the
/// renewal falls due before the next regular poll. Returns the number of polls.
pub(crate) async fn watch_copy<S: ObjectStore + ?Sized>(
    store: &S,
    config: &MonitorConfig,
    lease: &HeldLease<'_, S>,
    destination: &str,
) -> Result<u32> {
    let copy = store
        .start_copy(lease.key(), destination)
        .await
        .map_err(|e| Error::CopyFailed {
            destination: destination.to_string(),
            lease: lease.id(),
            source: Some(Box::new(e)),
        })?;

    let mut polls = 0;
    loop {
        // Never sleep past the point where the lease is due for renewal
        let wait = config.poll_interval.min(lease.until_due().await);
        tokio::time::sleep(wait).await;
        polls += 1;

        match store.copy_status(copy).await? {
            CopyStatus::Pending => {
                lease.renew_if_due().await?;
            }
            CopyStatus::Success => return Ok(polls),
            CopyStatus::Failed => {
                warn!(source = lease.key(), destination, %copy, "Backend reported copy failure");
                return Err(Error::CopyFailed {
                    destination: destination.to_string(),
                    lease: lease.id(),
                    source: None,
                });
            }
        }
    }
}

/// Deletes the source and its snapshots under the lease, then releases it.
pub(crate) async fn remove_source<S: ObjectStore + ?Sized>(
    store: &S,
    lease: HeldLease<'_, S>,
) -> Result<()> {
    store
        .delete(lease.key(), Some(lease.id()), DeleteSnapshots::Include)
        .await
        .map_err(|e| Error::DeleteFailed {
            key: lease.key().to_string(),
            source: Box::new(e),
        })?;
    lease.release().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_reference_configuration() {
        let config = MonitorConfig::default();
        assert_eq!(config.lease_duration, Duration::from_secs(60));
        assert_eq!(config.safety_margin, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let secs = Duration::from_secs;
        assert!(MonitorConfig::new(secs(60), secs(5), secs(1)).is_ok());
        assert!(MonitorConfig::new(secs(15), secs(14), secs(1)).is_ok());

        assert!(MonitorConfig::new(secs(10), secs(5), secs(1)).is_err());
        assert!(MonitorConfig::new(secs(61), secs(5), secs(1)).is_err());
        assert!(MonitorConfig::new(secs(60), secs(60), secs(1)).is_err());
        assert!(MonitorConfig::new(secs(60), Duration::ZERO, secs(1)).is_err());
        assert!(MonitorConfig::new(secs(60), secs(5), Duration::ZERO).is_err());
    }
}
