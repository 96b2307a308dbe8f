// Lease handle held by a copy attempt

use crate::store::LeaseId;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Reference lease duration, the longest finite lease a blob store grants
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Exclusive hold on one source object
///
/// Not `Clone`: the routine that acquired the lease owns it until it is
/// released or left to expire.
#[derive(Debug, PartialEq, Eq)]
pub struct LeaseHandle {
    id: LeaseId,
    key: String,
    acquired_at: DateTime<Utc>,
    duration: Duration,
    renewal_count: u32,
}

impl LeaseHandle {
    pub fn new(id: LeaseId, key: impl Into<String>, duration: Duration) -> Self {
        Self {
            id,
            key: key.into(),
            acquired_at: Utc::now(),
            duration,
            renewal_count: 0,
        }
    }

    pub fn id(&self) -> LeaseId {
        self.id
    }

    /// Key of the leased object
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn renewal_count(&self) -> u32 {
        self.renewal_count
    }

    pub(crate) fn record_renewal(&mut self) {
        self.renewal_count += 1;
    }
}
