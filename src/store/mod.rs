// Object storage capability used by the copy monitor
//
// A backend provides leases with a bounded duration, asynchronous
// server-side copies with a pollable status, and deletion with snapshot
// cleanup. Exclusivity of leases is enforced here, not by callers.

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::InMemoryStore;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of a lease granted by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Identifier of an in-flight server-side copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CopyId(pub Uuid);

impl CopyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CopyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Status of a server-side copy, as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed,
}

impl CopyStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CopyStatus::Pending)
    }
}

/// Whether a delete also removes the object's snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteSnapshots {
    /// Fail with `SnapshotsPresent` if any snapshot exists
    None,
    Include,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn acquire_lease(&self, key: &str, duration: Duration) -> Result<LeaseId>;
    /// Extends the lease by its original duration, measured from now.
    async fn renew_lease(&self, key: &str, lease: LeaseId) -> Result<()>;
    async fn release_lease(&self, key: &str, lease: LeaseId) -> Result<()>;

    /// Starts copying the current content of `source` to `destination`.
    async fn start_copy(&self, source: &str, destination: &str) -> Result<CopyId>;
    async fn copy_status(&self, copy: CopyId) -> Result<CopyStatus>;

    async fn delete(&self, key: &str, lease: Option<LeaseId>, snapshots: DeleteSnapshots)
        -> Result<()>;
}

/// Checks that a key names a flat object: no separators, no hidden names.
pub fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if key.contains('/') || key.contains('\\') {
        "key contains a path separator"
    } else if key.starts_with('.') {
        "key starts with '.'"
    } else {
        return Ok(());
    };

    Err(crate::Error::InvalidKey {
        key: key.to_string(),
        reason,
    })
}
