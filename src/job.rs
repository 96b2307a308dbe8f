// Move job: split a source into chunks, then move every chunk to its final
// name as concurrent child tasks under a job-wide deadline.

use crate::config::{Settings, DEFAULT_CHUNK_COUNT, DEFAULT_JOB_TIMEOUT, DEFAULT_MOVE_PREFIX};
use crate::diagnostics::{DiagnosticSink, ErrorReport, StoreSink, TracingSink};
use crate::fanout::FanOutReport;
use crate::monitor::{CopyReport, LeasedCopyMonitor, MonitorConfig};
use crate::store::ObjectStore;
use crate::util::moved_name;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub split: FanOutReport,
    pub moved: Vec<CopyReport>,
    pub failures: Vec<ErrorReport>,
}

impl JobReport {
    /// Every chunk was created and moved.
    pub fn is_success(&self) -> bool {
        self.split.all_created() && self.failures.is_empty()
    }
}

/// Runs move jobs against one store.
#[derive(Debug)]
pub struct JobRunner<S: ObjectStore + ?Sized + 'static> {
    monitor: LeasedCopyMonitor<S>,
    chunk_count: usize,
    move_prefix: String,
    timeout: Duration,
    sink: Arc<dyn DiagnosticSink>,
}

impl<S: ObjectStore + ?Sized + 'static> JobRunner<S> {
    pub fn new(monitor: LeasedCopyMonitor<S>) -> Self {
        Self {
            monitor,
            chunk_count: DEFAULT_CHUNK_COUNT,
            move_prefix: DEFAULT_MOVE_PREFIX.to_string(),
            timeout: DEFAULT_JOB_TIMEOUT,
            sink: Arc::new(TracingSink),
        }
    }

    /// Builds a runner from validated settings. When `report_errors` is set
    /// errors are written into the store, otherwise only traced.
    pub fn from_settings(store: Arc<S>, settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let config: MonitorConfig = settings.monitor_config()?;
        let sink: Arc<dyn DiagnosticSink> = if settings.report_errors {
            Arc::new(
                StoreSink::new(Arc::clone(&store)).with_prefix(settings.diagnostics_prefix.clone()),
            )
        } else {
            Arc::new(TracingSink)
        };

        Ok(Self {
            monitor: LeasedCopyMonitor::new(store, config)?,
            chunk_count: settings.chunk_count,
            move_prefix: settings.move_prefix.clone(),
            timeout: settings.job_timeout(),
            sink,
        })
    }

    pub fn with_chunk_count(mut self, chunk_count: usize) -> Self {
        self.chunk_count = chunk_count;
        self
    }

    pub fn with_move_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.move_prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Runs one job over `source`.
    ///
    /// Errors that stop the job (the split failing, the deadline passing)
    /// are reported to the sink and returned. Failures of single chunk moves
    /// are reported and collected in the returned [`JobReport`].
    #[instrument(skip(self), fields(chunks = self.chunk_count, timeout = ?self.timeout))]
    pub async fn run(&self, source: &str) -> Result<JobReport> {
        let job_id = Uuid::new_v4();
        info!(%job_id, "Job started");

        let outcome = match tokio::time::timeout(self.timeout, self.execute(job_id, source)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::JobTimedOut {
                job_id,
                timeout: self.timeout,
            }),
        };

        match outcome {
            Ok(report) => {
                info!(
                    %job_id,
                    moved = report.moved.len(),
                    failures = report.failures.len(),
                    "Job finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.report(ErrorReport::from_error(format!("job {job_id} on {source}"), &e))
                    .await;
                Err(e)
            }
        }
    }

    async fn execute(&self, job_id: Uuid, source: &str) -> Result<JobReport> {
        let split = self.monitor.split(source, self.chunk_count).await?;

        // Dropping the set on timeout aborts every move still in flight
        let mut moves = JoinSet::new();
        let mut names = HashMap::new();
        for chunk in split.created() {
            let destination = moved_name(&self.move_prefix, chunk)?;
            let monitor = self.monitor.clone();
            let chunk = chunk.to_string();
            let handle = moves.spawn({
                let chunk = chunk.clone();
                async move { monitor.copy_with_lease(&chunk, &destination).await }
            });
            names.insert(handle.id(), chunk);
        }

        let mut moved = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = moves.join_next_with_id().await {
            let failure = match joined {
                Ok((_, Ok(report))) => {
                    moved.push(report);
                    continue;
                }
                Ok((id, Err(e))) => ErrorReport::from_error(Self::context(&names, id), &e),
                Err(join_error) => {
                    let name = Self::context(&names, join_error.id());
                    let e = Error::TaskFailed {
                        name: name.clone(),
                        reason: join_error.to_string(),
                    };
                    ErrorReport::from_error(name, &e)
                }
            };
            warn!(%job_id, context = %failure.context, kind = %failure.kind, "Chunk move failed");
            self.report(failure.clone()).await;
            failures.push(failure);
        }

        moved.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(JobReport {
            job_id,
            split,
            moved,
            failures,
        })
    }

    fn context(names: &HashMap<tokio::task::Id, String>, id: tokio::task::Id) -> String {
        match names.get(&id) {
            Some(chunk) => format!("move {chunk}"),
            None => format!("move task {id}"),
        }
    }

    async fn report(&self, report: ErrorReport) {
        if let Err(e) = self.sink.report(&report).await {
            warn!(error = %e, kind = %report.kind, "Could not record error report");
        }
    }
}
