use std::{
    collections::BTreeMap,
    path::PathBuf,
};

use crate::remote::backend::JobStatus;

/// Configuration problems. These are fatal for a run and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Undefined input: aoi, scale, or crs")]
    MissingGeo,

    #[error("`aoi` incorrect: {0}")]
    InvalidAoi(String),

    #[error("a root namespace is required: set `root_dir` or `project`")]
    MissingRootNamespace,

    #[error("asset `{0}` reports no bounds to derive an aoi from")]
    NoBounds(String),

    #[error("failed to read settings from `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse `{path}`: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("home dir is not available")]
    NoHomeDir,
}

/// Errors reported by a remote backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connectivity trouble; the request may succeed if repeated.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("request rejected by backend: {0}")]
    Rejected(String),

    #[error("unexpected response from backend: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Connection(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            BackendError::Connection(err.to_string())
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Rejected(err.to_string())
        }
    }
}

/// One or more remote jobs ended in the `Failed` state.
///
/// Carries the backend-reported status of every failed job, keyed by job id,
/// so callers can decide whether some failures are acceptable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed remote jobs: {}", .statuses.len())]
pub struct RemoteJobsFailed {
    statuses: BTreeMap<String, JobStatus>,
}

impl RemoteJobsFailed {
    pub fn new(statuses: BTreeMap<String, JobStatus>) -> Self {
        RemoteJobsFailed { statuses }
    }

    pub fn failure_count(&self) -> usize {
        self.statuses.len()
    }

    pub fn statuses(&self) -> &BTreeMap<String, JobStatus> {
        &self.statuses
    }

    pub fn error_messages(&self) -> Vec<&str> {
        self.statuses
            .values()
            .filter_map(|s| s.error_message.as_deref())
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("object `{0}` not found")]
    NotFound(String),

    #[error("transfer i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a task run can fail with. The original error is kept intact.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    RemoteJobs(#[from] RemoteJobsFailed),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
