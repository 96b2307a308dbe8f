// Directory-backed object store
//
// The root directory plays the role of a container. A lease is a numbered
// generation of JSON records under `.leases/<key>/`. A new generation is
// published with a hard link, which fails when the generation exists, so
// separate processes contending for a lease get exactly one winner. Records
// are replaced whole with a rename and never rewritten in place.

use super::{validate_key, CopyId, CopyStatus, DeleteSnapshots, LeaseId, ObjectStore};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const LEASE_DIR: &str = ".leases";
const SNAPSHOT_DIR: &str = ".snapshots";
const PARTIAL_DIR: &str = ".partial";

/// On-disk form of a lease
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    id: LeaseId,
    duration_ms: u64,
    expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn new(id: LeaseId, duration: Duration) -> Result<Self> {
        let mut record = Self {
            id,
            duration_ms: u64::try_from(duration.as_millis())
                .map_err(|_| Error::Config(format!("lease duration {duration:?} is too long")))?,
            expires_at: Utc::now(),
        };
        record.extend_from(Utc::now());
        Ok(record)
    }

    fn extend_from(&mut self, now: DateTime<Utc>) {
        self.expires_at = now + chrono::Duration::milliseconds(self.duration_ms as i64);
    }

    fn expire_now(&mut self) {
        self.expires_at = Utc::now();
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A lease record and the generation it was published as
#[derive(Debug, Clone)]
struct Generation {
    number: u64,
    record: LeaseRecord,
}

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    copies: Arc<DashMap<CopyId, CopyStatus>>,
}

impl FsStore {
    /// Opens a store rooted at `root`, creating the directory layout if needed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [LEASE_DIR, SNAPSHOT_DIR, PARTIAL_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self {
            root,
            copies: Arc::new(DashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Object keys in the container, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                if !name.starts_with('.') {
                    keys.push(name);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Copies the object's current content into its snapshot directory.
    pub async fn snapshot(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        let data = self.get(key).await?.ok_or_else(|| Error::ObjectNotFound {
            key: key.to_string(),
        })?;

        let dir = self.snapshot_dir(key);
        fs::create_dir_all(&dir).await?;
        let index = self.snapshot_count(key).await? + 1;
        let path = dir.join(format!("{index:06}"));
        fs::write(&path, &data).await?;
        Ok(path)
    }

    pub async fn snapshot_count(&self, key: &str) -> Result<usize> {
        let mut entries = match fs::read_dir(self.snapshot_dir(key)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn lease_dir(&self, key: &str) -> PathBuf {
        self.root.join(LEASE_DIR).join(key)
    }

    fn generation_path(&self, key: &str, number: u64) -> PathBuf {
        self.lease_dir(key).join(format!("{number:020}.json"))
    }

    fn snapshot_dir(&self, key: &str) -> PathBuf {
        self.root.join(SNAPSHOT_DIR).join(key)
    }

    /// Published lease generations of `key`, oldest first
    async fn generations(&self, key: &str) -> Result<Vec<u64>> {
        let mut entries = match fs::read_dir(self.lease_dir(key)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut numbers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let number = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(".json"))
                .and_then(|stem| stem.parse::<u64>().ok());
            if let Some(number) = number {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    async fn newest_generation(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.generations(key).await?.last().copied())
    }

    async fn read_generation(&self, key: &str, number: u64) -> Result<Option<LeaseRecord>> {
        match fs::read(self.generation_path(key, number)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The newest lease record of `key`, expired or not.
    async fn current_lease(&self, key: &str) -> Result<Option<Generation>> {
        for number in self.generations(key).await?.into_iter().rev() {
            // A generation can vanish between listing and reading when it is pruned
            if let Some(record) = self.read_generation(key, number).await? {
                return Ok(Some(Generation { number, record }));
            }
        }
        Ok(None)
    }

    async fn active_lease(&self, key: &str) -> Result<Option<LeaseRecord>> {
        Ok(self
            .current_lease(key)
            .await?
            .map(|generation| generation.record)
            .filter(|record| !record.is_expired(Utc::now())))
    }

    /// Writes a complete record to a private temp file in the lease directory.
    async fn write_temp(&self, key: &str, record: &LeaseRecord) -> Result<PathBuf> {
        let dir = self.lease_dir(key);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!(".tmp-{}", Uuid::new_v4().simple()));
        fs::write(&path, serde_json::to_vec(record)?).await?;
        Ok(path)
    }

    /// Publishes `record` as generation `number`. Returns `false` when that
    /// generation already exists; the record is never visible half-written.
    async fn publish(&self, key: &str, number: u64, record: &LeaseRecord) -> Result<bool> {
        let temp = self.write_temp(key, record).await?;
        let linked = fs::hard_link(&temp, self.generation_path(key, number)).await;
        discard(&temp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces generation `number` with `record` in one rename.
    async fn replace(&self, key: &str, number: u64, record: &LeaseRecord) -> Result<()> {
        let temp = self.write_temp(key, record).await?;
        if let Err(e) = fs::rename(&temp, self.generation_path(key, number)).await {
            discard(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Drops generations older than `newest`.
    async fn prune(&self, key: &str, newest: u64) -> Result<()> {
        for number in self.generations(key).await? {
            if number < newest {
                discard(&self.generation_path(key, number)).await;
            }
        }
        Ok(())
    }

    async fn require_object(&self, key: &str) -> Result<()> {
        if fs::try_exists(self.object_path(key)).await? {
            Ok(())
        } else {
            Err(Error::ObjectNotFound {
                key: key.to_string(),
            })
        }
    }
}

/// Removes a file, logging anything but its absence.
async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not remove file");
        }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        validate_key(key)?;
        if self.active_lease(key).await?.is_some() {
            return Err(Error::LeaseAlreadyPresent {
                key: key.to_string(),
            });
        }
        fs::write(self.object_path(key), &data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        match fs::read(self.object_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn acquire_lease(&self, key: &str, duration: Duration) -> Result<LeaseId> {
        validate_key(key)?;
        self.require_object(key).await?;

        let current = self.current_lease(key).await?;
        let next = match &current {
            Some(previous) if !previous.record.is_expired(Utc::now()) => {
                return Err(Error::LeaseAlreadyPresent {
                    key: key.to_string(),
                })
            }
            Some(previous) => {
                debug!(key, lease = %previous.record.id, "Taking over expired lease");
                previous.number + 1
            }
            None => 1,
        };

        let record = LeaseRecord::new(LeaseId::new(), duration)?;
        if !self.publish(key, next, &record).await? {
            return Err(Error::LeaseAlreadyPresent {
                key: key.to_string(),
            });
        }

        // Back off if someone published past us or the previous holder renewed
        // between our read and our publish
        let superseded = self.newest_generation(key).await? != Some(next);
        let revived = match &current {
            Some(previous) => self
                .read_generation(key, previous.number)
                .await?
                .is_some_and(|record| !record.is_expired(Utc::now())),
            None => false,
        };
        if superseded || revived {
            discard(&self.generation_path(key, next)).await;
            return Err(Error::LeaseAlreadyPresent {
                key: key.to_string(),
            });
        }

        self.prune(key, next).await?;
        Ok(record.id)
    }

    async fn renew_lease(&self, key: &str, lease: LeaseId) -> Result<()> {
        validate_key(key)?;
        let mut current = match self.current_lease(key).await? {
            Some(current) if current.record.id == lease => current,
            _ => {
                return Err(Error::LeaseMismatch {
                    key: key.to_string(),
                    lease,
                })
            }
        };

        let now = Utc::now();
        if current.record.is_expired(now) {
            return Err(Error::LeaseExpired {
                key: key.to_string(),
                lease,
            });
        }

        current.record.extend_from(now);
        self.replace(key, current.number, &current.record).await?;

        // A contender that saw the lease expire may have taken over meanwhile
        if self.newest_generation(key).await? != Some(current.number) {
            return Err(Error::LeaseExpired {
                key: key.to_string(),
                lease,
            });
        }
        Ok(())
    }

    async fn release_lease(&self, key: &str, lease: LeaseId) -> Result<()> {
        validate_key(key)?;
        match self.current_lease(key).await? {
            Some(mut current) if current.record.id == lease => {
                current.record.expire_now();
                self.replace(key, current.number, &current.record).await
            }
            Some(current) if !current.record.is_expired(Utc::now()) => Err(Error::LeaseMismatch {
                key: key.to_string(),
                lease,
            }),
            _ => Ok(()),
        }
    }

    async fn start_copy(&self, source: &str, destination: &str) -> Result<CopyId> {
        validate_key(source)?;
        validate_key(destination)?;
        self.require_object(source).await?;
        if self.active_lease(destination).await?.is_some() {
            return Err(Error::LeaseAlreadyPresent {
                key: destination.to_string(),
            });
        }

        let id = CopyId::new();
        self.copies.insert(id, CopyStatus::Pending);

        let copies = Arc::clone(&self.copies);
        let from = self.object_path(source);
        let to = self.object_path(destination);
        let partial = self.root.join(PARTIAL_DIR).join(id.to_string());

        tokio::spawn(async move {
            let result = async {
                fs::copy(&from, &partial).await?;
                fs::rename(&partial, &to).await
            }
            .await;

            let status = match result {
                Ok(()) => CopyStatus::Success,
                Err(e) => {
                    warn!(copy = %id, destination = %to.display(), "Copy failed: {}", e);
                    discard(&partial).await;
                    CopyStatus::Failed
                }
            };
            copies.insert(id, status);
        });

        Ok(id)
    }

    async fn copy_status(&self, copy: CopyId) -> Result<CopyStatus> {
        let status = self
            .copies
            .get(&copy)
            .map(|status| *status)
            .ok_or(Error::UnknownCopy(copy))?;

        // Only the copy task writes a terminal status, and it writes it last
        if status.is_terminal() {
            self.copies.remove(&copy);
        }
        Ok(status)
    }

    async fn delete(
        &self,
        key: &str,
        lease: Option<LeaseId>,
        snapshots: DeleteSnapshots,
    ) -> Result<()> {
        validate_key(key)?;
        self.require_object(key).await?;

        let now = Utc::now();
        let current = self.current_lease(key).await?.map(|generation| generation.record);
        match (current, lease) {
            (Some(record), Some(given)) if record.id == given => {
                if record.is_expired(now) {
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
                })
            }
            (Some(record), None) if !record.is_expired(now) => {
                return Err(Error::LeaseAlreadyPresent {
                    key: key.to_string(),
                })
            }
            _ => {}
        }

        if self.snapshot_count(key).await? > 0 {
            if snapshots == DeleteSnapshots::None {
                return Err(Error::SnapshotsPresent {
                    key: key.to_string(),
                });
            }
            fs::remove_dir_all(self.snapshot_dir(key)).await?;
        }

        fs::remove_file(self.object_path(key)).await?;
        match fs::remove_dir_all(self.lease_dir(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
