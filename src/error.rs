use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::store::{CopyId, LeaseId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Lease unavailable: {key:?} is already leased by another holder")]
    LeaseUnavailable { key: String },

    #[error("Lease renewal failed for {key:?}")]
    RenewalFailed {
        key: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Copy failed for destination {destination:?}")]
    CopyFailed {
        destination: String,
        /// Lease still held on the source, left for the caller to release.
        lease: LeaseId,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("Delete of {key:?} failed after a successful copy")]
    DeleteFailed {
        key: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Object not found: {key:?}")]
    ObjectNotFound { key: String },

    #[error("Object {key:?} already has an active lease")]
    LeaseAlreadyPresent { key: String },

    #[error("Lease {lease} does not match the active lease on {key:?}")]
    LeaseMismatch { key: String, lease: LeaseId },

    #[error("Lease {lease} on {key:?} has expired")]
    LeaseExpired { key: String, lease: LeaseId },

    #[error("Object {key:?} has snapshots; delete must include them")]
    SnapshotsPresent { key: String },

    #[error("Unknown copy operation {0}")]
    UnknownCopy(CopyId),

    #[error("Invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Job {job_id} exceeded its deadline of {timeout:?}")]
    JobTimedOut { job_id: Uuid, timeout: Duration },

    #[error("Task {name:?} did not complete: {reason}")]
    TaskFailed { name: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable name of the error variant, used in diagnostic reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::LeaseUnavailable { .. } => "LeaseUnavailable",
            Error::RenewalFailed { .. } => "RenewalFailed",
            Error::CopyFailed { .. } => "CopyFailed",
            Error::DeleteFailed { .. } => "DeleteFailed",
            Error::ObjectNotFound { .. } => "ObjectNotFound",
            Error::LeaseAlreadyPresent { .. } => "LeaseAlreadyPresent",
            Error::LeaseMismatch { .. } => "LeaseMismatch",
            Error::LeaseExpired { .. } => "LeaseExpired",
            Error::SnapshotsPresent { .. } => "SnapshotsPresent",
            Error::UnknownCopy(_) => "UnknownCopy",
            Error::InvalidKey { .. } => "InvalidKey",
            Error::Config(_) => "Config",
            Error::JobTimedOut { .. } => "JobTimedOut",
            Error::TaskFailed { .. } => "TaskFailed",
            Error::Serialization(_) => "Serialization",
            Error::Io(_) => "Io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
