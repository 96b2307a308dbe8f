// In-memory object store with a simulated server-side copy engine
//
// Copies complete after a configurable latency measured on the tokio clock,
// so tests can pause time and drive long copies deterministically.

use super::{CopyId, CopyStatus, DeleteSnapshots, LeaseId, ObjectStore};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct ActiveLease {
    id: LeaseId,
    duration: Duration,
    expires_at: Instant,
}

impl ActiveLease {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct StoredObject {
    data: Bytes,
    snapshots: Vec<Bytes>,
    lease: Option<ActiveLease>,
}

impl StoredObject {
    fn new(data: Bytes) -> Self {
        Self {
            data,
            snapshots: Vec::new(),
            lease: None,
        }
    }

    fn active_lease(&self, now: Instant) -> Option<ActiveLease> {
        self.lease.filter(|lease| !lease.is_expired(now))
    }
}

#[derive(Debug)]
struct PendingCopy {
    destination: String,
    data: Bytes,
    ready_at: Instant,
    outcome: CopyStatus,
}

#[derive(Debug, Default)]
struct Faults {
    failing_destinations: HashSet<String>,
    failing_deletes: HashSet<String>,
    /// Renewals that may still succeed before every further one fails
    renewals_allowed: Option<usize>,
}

/// Counters of store calls, for asserting on protocol behaviour
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub renew_calls: usize,
    pub release_calls: usize,
    pub delete_calls: usize,
    pub copies_started: usize,
}

#[derive(Debug)]
pub struct InMemoryStore {
    objects: DashMap<String, StoredObject>,
    copies: DashMap<CopyId, PendingCopy>,
    copy_latency: RwLock<Duration>,
    faults: Mutex<Faults>,
    stats: Mutex<StoreStats>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            copies: DashMap::new(),
            copy_latency: RwLock::new(Duration::ZERO),
            faults: Mutex::new(Faults::default()),
            stats: Mutex::new(StoreStats::default()),
        }
    }

    /// Every copy started afterwards stays `Pending` for `latency`.
    pub fn with_copy_latency(self, latency: Duration) -> Self {
        self.set_copy_latency(latency);
        self
    }

    pub fn set_copy_latency(&self, latency: Duration) {
        *self.copy_latency.write() = latency;
    }

    /// Copies into `destination` report `Failed` once their latency elapses.
    pub fn fail_copies_to(&self, destination: &str) {
        self.faults
            .lock()
            .failing_destinations
            .insert(destination.to_string());
    }

    /// Every delete of `key` fails with an I/O error.
    pub fn fail_deletes_of(&self, key: &str) {
        self.faults.lock().failing_deletes.insert(key.to_string());
    }

    /// Allows `count` more successful renewals, then fails every renewal.
    pub fn fail_renewals_after(&self, count: usize) {
        self.faults.lock().renewals_allowed = Some(count);
    }

    /// Takes a snapshot of the object's current content.
    pub fn snapshot(&self, key: &str) -> Result<usize> {
        let mut object = self.objects.get_mut(key).ok_or_else(|| Error::ObjectNotFound {
            key: key.to_string(),
        })?;
        let data = object.data.clone();
        object.snapshots.push(data);
        Ok(object.snapshots.len())
    }

    pub fn snapshot_count(&self, key: &str) -> usize {
        self.objects
            .get(key)
            .map(|object| object.snapshots.len())
            .unwrap_or(0)
    }

    /// The unexpired lease on `key`, if any.
    pub fn active_lease(&self, key: &str) -> Option<LeaseId> {
        let now = Instant::now();
        self.objects
            .get(key)
            .and_then(|object| object.active_lease(now))
            .map(|lease| lease.id)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> StoreStats {
        *self.stats.lock()
    }

    fn not_found(key: &str) -> Error {
        Error::ObjectNotFound {
            key: key.to_string(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let now = Instant::now();
        match self.objects.get_mut(key) {
            Some(mut object) => {
                if object.active_lease(now).is_some() {
                    return Err(Error::LeaseAlreadyPresent {
                        key: key.to_string(),
                    });
                }
                object.data = data;
            }
            None => {
                self.objects.insert(key.to_string(), StoredObject::new(data));
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.get(key).map(|object| object.data.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn acquire_lease(&self, key: &str, duration: Duration) -> Result<LeaseId> {
        let now = Instant::now();
        let mut object = self.objects.get_mut(key).ok_or_else(|| Self::not_found(key))?;

        if object.active_lease(now).is_some() {
            return Err(Error::LeaseAlreadyPresent {
                key: key.to_string(),
            });
        }

        let lease = ActiveLease {
            id: LeaseId::new(),
            duration,
            expires_at: now + duration,
        };
        object.lease = Some(lease);
        Ok(lease.id)
    }

    async fn renew_lease(&self, key: &str, lease: LeaseId) -> Result<()> {
        self.stats.lock().renew_calls += 1;

        {
            let mut faults = self.faults.lock();
            if let Some(allowed) = faults.renewals_allowed.as_mut() {
                if *allowed == 0 {
                    return Err(Error::LeaseExpired {
                        key: key.to_string(),
                        lease,
                    });
                }
                *allowed -= 1;
            }
        }

        let now = Instant::now();
        let mut object = self.objects.get_mut(key).ok_or_else(|| Self::not_found(key))?;
        let current = match object.lease {
            Some(current) if current.id == lease => current,
            _ => {
                return Err(Error::LeaseMismatch {
                    key: key.to_string(),
                    lease,
                })
            }
        };

        if current.is_expired(now) {
            return Err(Error::LeaseExpired {
                key: key.to_string(),
                lease,
            });
        }

        object.lease = Some(ActiveLease {
            expires_at: now + current.duration,
            ..current
        });
        Ok(())
    }

    async fn release_lease(&self, key: &str, lease: LeaseId) -> Result<()> {
        self.stats.lock().release_calls += 1;

        let Some(mut object) = self.objects.get_mut(key) else {
            // Deleting the object already ended its lease
            return Ok(());
        };

        match object.lease {
            Some(current) if current.id == lease => {
                object.lease = None;
                Ok(())
            }
            Some(current) if !current.is_expired(Instant::now()) => Err(Error::LeaseMismatch {
                key: key.to_string(),
                lease,
            }),
            _ => Ok(()),
        }
    }

    async fn start_copy(&self, source: &str, destination: &str) -> Result<CopyId> {
        let data = self
            .objects
            .get(source)
            .map(|object| object.data.clone())
            .ok_or_else(|| Self::not_found(source))?;

        let outcome = if self.faults.lock().failing_destinations.contains(destination) {
            CopyStatus::Failed
        } else {
            CopyStatus::Success
        };

        let id = CopyId::new();
        self.copies.insert(
            id,
            PendingCopy {
                destination: destination.to_string(),
                data,
                ready_at: Instant::now() + *self.copy_latency.read(),
                outcome,
            },
        );
        self.stats.lock().copies_started += 1;
        Ok(id)
    }

    async fn copy_status(&self, copy: CopyId) -> Result<CopyStatus> {
        let now = Instant::now();
        {
            let pending = self.copies.get(&copy).ok_or(Error::UnknownCopy(copy))?;
            if now < pending.ready_at {
                return Ok(CopyStatus::Pending);
            }
        }

        // A terminal status is reported once, then the copy is forgotten
        let (_, pending) = self
            .copies
            .remove(&copy)
            .ok_or(Error::UnknownCopy(copy))?;
        if pending.outcome == CopyStatus::Failed {
            return Ok(CopyStatus::Failed);
        }

        match self.objects.get_mut(&pending.destination) {
            Some(existing) if existing.active_lease(now).is_some() => Ok(CopyStatus::Failed),
            Some(mut existing) => {
                existing.data = pending.data;
                Ok(CopyStatus::Success)
            }
            None => {
                self.objects
                    .insert(pending.destination, StoredObject::new(pending.data));
                Ok(CopyStatus::Success)
            }
        }
    }

    async fn delete(
        &self,
        key: &str,
        lease: Option<LeaseId>,
        snapshots: DeleteSnapshots,
    ) -> Result<()> {
        self.stats.lock().delete_calls += 1;

        if self.faults.lock().failing_deletes.contains(key) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("delete of {key} refused"),
            )));
        }

        let now = Instant::now();
        {
            let object = self.objects.get(key).ok_or_else(|| Self::not_found(key))?;

            match (object.lease, lease) {
                (Some(current), Some(given)) if current.id == given => {
                    if current.is_expired(now) {
                        return Err(Error::LeaseExpired {
                            key: key.to_string(),
                            lease: given,
                        });
                    }
                }
                (_, Some(given)) => {
                    return Err(Error::LeaseMismatch {
                        key: key.to_string(),
                        lease: given,
                    });
                }
                (Some(current), None) if !current.is_expired(now) => {
                    return Err(Error::LeaseAlreadyPresent {
                        key: key.to_string(),
                    });
                }
                _ => {}
            }

            if !object.snapshots.is_empty() && snapshots == DeleteSnapshots::None {
                return Err(Error::SnapshotsPresent {
                    key: key.to_string(),
                });
            }
        }

        self.objects.remove(key);
        Ok(())
    }
}
