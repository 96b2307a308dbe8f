//! Structured error reporting.
//!
//! Errors that end a job or a CLI command are turned into an [`ErrorReport`]
//! (kind, message and the chain of causes) and handed to a
//! [`DiagnosticSink`]. The copy monitor itself never reports; it only
//! returns errors.

use crate::store::{validate_key, ObjectStore};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// What was being done when the error surfaced
    pub context: String,
    pub kind: String,
    pub message: String,
    /// Messages of nested causes, outermost first
    pub causes: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn from_error(context: impl Into<String>, error: &Error) -> Self {
        let mut causes = Vec::new();
        let mut next = std::error::Error::source(error);
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }

        Self {
            context: context.into(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            causes,
            occurred_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DiagnosticSink: Send + Sync + fmt::Debug {
    /// Records the report and returns where it went.
    async fn report(&self, report: &ErrorReport) -> Result<String>;
}

/// Writes each report as a JSON object named `<prefix><uuid>-errors.json`.
#[derive(Debug)]
pub struct StoreSink<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    prefix: String,
}

impl<S: ObjectStore + ?Sized> StoreSink<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

#[async_trait]
impl<S: ObjectStore + ?Sized> DiagnosticSink for StoreSink<S> {
    async fn report(&self, report: &ErrorReport) -> Result<String> {
        let key = format!("{}{}-errors.json", self.prefix, Uuid::new_v4().simple());
        validate_key(&key)?;

        let body = serde_json::to_vec_pretty(report)?;
        self.store.put(&key, Bytes::from(body)).await?;
        info!(%key, kind = %report.kind, "Error report written");
        Ok(key)
    }
}

/// Emits reports as `tracing` events only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl DiagnosticSink for TracingSink {
    async fn report(&self, report: &ErrorReport) -> Result<String> {
        error!(
            context = %report.context,
            kind = %report.kind,
            causes = ?report.causes,
            "{}",
            report.message
        );
        Ok("tracing".to_string())
    }
}
