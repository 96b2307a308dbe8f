pub use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

pub use bytes::Bytes;

pub use crate::config::Settings;
pub use crate::diagnostics::{DiagnosticSink, ErrorReport, StoreSink, TracingSink};
pub use crate::fanout::{CopyResult, FanOutReport};
pub use crate::job::{JobReport, JobRunner};
pub use crate::monitor::{copy_with_lease, CopyReport, LeasedCopyMonitor, MonitorConfig};
pub use crate::store::{
    CopyId, CopyStatus, DeleteSnapshots, FsStore, InMemoryStore, LeaseId, ObjectStore,
};
pub use crate::{Error, Result};
