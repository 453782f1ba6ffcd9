//! Remote job orchestration.
//!
//! [`Orchestrator`] owns everything one run needs to talk to the backend:
//! the root namespace, the jobs it submitted, pending overwrite transactions
//! and the results of input validation. [`EeTask`] plugs it into the
//! lifecycle engine.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use chrono::NaiveDate;

use crate::{
    config::Settings,
    error::ConfigError,
    geo::GeoConfig,
    inputs::Inputs,
    task::TaskOptions,
};

pub mod backend;
pub mod memory;
pub mod rest;

mod assets;
mod eetask;
mod freshness;
mod metadata;
mod poll;
mod submit;

pub use assets::TransactionPair;
pub use backend::{
    AssetInfo, AssetKind, JobId, JobState, JobStatus, RemoteBackend,
};
pub use eetask::{
    EeTask, RemoteWork,
};
pub use freshness::{
    asset_age_years, date_from_millis, date_to_millis, InputFailure, InputProblem,
};
pub use metadata::{
    flatten_inputs, TIMESTAMP_PROPERTY,
};
pub use poll::{
    Backoff, JobHandle, PollPolicy,
};
pub use submit::ImageExport;

pub const PROJECTS: &str = "projects";

/// Limits applied to every export.
#[derive(Debug, Clone)]
pub struct ExportLimits {
    pub max_pixels: u64,

    // the backend caps how many properties an asset may carry
    pub max_properties: usize,
}

impl Default for ExportLimits {
    fn default() -> Self {
        ExportLimits {
            max_pixels: 10_000_000_000_000,
            max_properties: 100,
        }
    }
}

/// Root namespace from an explicit directory or a project name.
pub fn root_namespace(
    project: Option<&str>,
    root_dir: Option<&str>,
) -> Result<String, ConfigError> {
    let root = match (root_dir, project) {
        (Some(dir), _) if false == dir.trim_matches('/').is_empty() => dir.to_string(),
        (_, Some(project)) if false == project.trim_matches('/').is_empty() => {
            format!("{PROJECTS}/{}", project.trim_matches('/'))
        },
        _ => return Err(ConfigError::MissingRootNamespace),
    };
    Ok(root.trim_matches('/').to_string())
}

pub struct Orchestrator {
    backend: Arc<dyn RemoteBackend>,

    root_dir: String,

    taskdate: NaiveDate,

    overwrite: bool,

    pub geo: GeoConfig,

    inputs: Inputs,

    // tracked until terminal
    jobs: BTreeMap<JobId, JobHandle>,

    transactions: Vec<TransactionPair>,

    input_failures: Vec<InputFailure>,

    poll: PollPolicy,

    limits: ExportLimits,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        root_dir: impl Into<String>,
        options: &TaskOptions,
    ) -> Result<Self, ConfigError> {
        let root_dir = root_namespace(None, Some(&root_dir.into()))?;
        Ok(Orchestrator {
            backend: backend,
            root_dir: root_dir,
            taskdate: options.taskdate,
            overwrite: options.overwrite,
            geo: GeoConfig::default(),
            inputs: Inputs::new(),
            jobs: BTreeMap::new(),
            transactions: vec![],
            input_failures: vec![],
            poll: PollPolicy::default(),
            limits: ExportLimits::default(),
        })
    }

    pub fn from_settings(
        backend: Arc<dyn RemoteBackend>,
        settings: &Settings,
        options: &TaskOptions,
    ) -> Result<Self, ConfigError> {
        let root_dir = root_namespace(
            settings.backend.project.as_deref(),
            settings.backend.root_dir.as_deref(),
        )?;
        Ok(Orchestrator::new(backend, root_dir, options)?
            .with_poll_policy(settings.polling.policy())
            .with_limits(settings.export.limits()))
    }

    pub fn with_geo(mut self, geo: GeoConfig) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_inputs(mut self, inputs: Inputs) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_limits(mut self, limits: ExportLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn backend(&self) -> &Arc<dyn RemoteBackend> {
        &self.backend
    }

    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }

    pub fn taskdate(&self) -> NaiveDate {
        self.taskdate
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    pub fn input_failures(&self) -> &[InputFailure] {
        &self.input_failures
    }

    pub fn transactions(&self) -> &[TransactionPair] {
        &self.transactions
    }

    /// Ids of jobs not yet seen in a terminal state.
    pub fn pending_jobs(&self) -> Vec<&JobId> {
        self.jobs.keys().collect()
    }

    pub fn job(&self, id: &str) -> Option<&JobHandle> {
        self.jobs.get(id)
    }

    /// Start tracking a job submitted elsewhere; `wait` will block on it.
    pub fn track_job(&mut self, id: JobId) {
        self.jobs
            .entry(id.clone())
            .or_insert_with(|| JobHandle::new(id));
    }

    // prefix a relative path with the root namespace
    fn absolute(&self, path: &str) -> String {
        format!("{}/{}", self.root_dir, path.trim_matches('/'))
    }
}
