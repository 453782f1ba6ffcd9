//! An in-process backend with a scriptable job queue, for tests and dry runs.

use std::{
    collections::{
        BTreeMap,
        VecDeque,
    },
    sync::{
        Mutex,
        MutexGuard,
    },
};

use async_trait::async_trait;

use super::{
    backend::{
        AssetInfo, AssetKind, ExportKind, ExportRequest, IngestRequest, JobId, JobState, JobStatus,
        PropertyValue, RemoteBackend,
    },
    metadata::TIMESTAMP_PROPERTY,
};
use crate::error::BackendError;

/// States a job reports on successive status queries. The last one sticks.
#[derive(Debug, Clone)]
pub struct JobScript {
    pub states: Vec<JobState>,

    pub error_message: Option<String>,
}

impl JobScript {
    pub fn new(states: Vec<JobState>) -> Self {
        JobScript {
            states: states,
            error_message: None,
        }
    }

    pub fn completes() -> Self {
        JobScript::new(vec![JobState::Completed])
    }

    pub fn fails(message: impl Into<String>) -> Self {
        JobScript {
            states: vec![JobState::Failed],
            error_message: Some(message.into()),
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

#[derive(Debug)]
struct Job {
    states: VecDeque<JobState>,
    error_message: Option<String>,
    // materialized when the job succeeds
    output: Option<AssetInfo>,
}

#[derive(Debug, Default)]
struct Inner {
    assets: BTreeMap<String, AssetInfo>,
    jobs: BTreeMap<JobId, Job>,
    scripts: VecDeque<JobScript>,
    exports: Vec<ExportRequest>,
    ingests: Vec<IngestRequest>,
    transient_failures: u32,
    status_queries: u32,
    next_id: u64,
}

impl Inner {
    fn new_job(&mut self, output: Option<AssetInfo>) -> JobId {
        self.next_id += 1;
        let id = format!("job-{}", self.next_id);
        let script = self.scripts.pop_front().unwrap_or_else(JobScript::completes);
        self.jobs.insert(id.clone(), Job {
            states: script.states.into(),
            error_message: script.error_message,
            output: output,
        });
        id
    }

    fn children(&self, parent: &str) -> Vec<String> {
        let prefix = format!("{parent}/");
        self.assets
            .range(prefix.clone()..)
            .take_while(|(id, _)| id.starts_with(&prefix))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_asset(&self, asset: AssetInfo) {
        self.lock().assets.insert(asset.id.clone(), asset);
    }

    pub fn asset(&self, id: &str) -> Option<AssetInfo> {
        self.lock().assets.get(id).cloned()
    }

    pub fn asset_ids(&self) -> Vec<String> {
        self.lock().assets.keys().cloned().collect()
    }

    /// Script the next submitted job; unscripted jobs complete at once.
    pub fn script_next_job(&self, script: JobScript) {
        self.lock().scripts.push_back(script);
    }

    /// Register a job that was submitted out of band.
    pub fn add_job(&self, id: impl Into<JobId>, script: JobScript) {
        self.lock().jobs.insert(id.into(), Job {
            states: script.states.into(),
            error_message: script.error_message,
            output: None,
        });
    }

    /// Make the next `count` status queries fail with a connection error.
    pub fn fail_next_status_queries(&self, count: u32) {
        self.lock().transient_failures = count;
    }

    pub fn status_queries(&self) -> u32 {
        self.lock().status_queries
    }

    pub fn exports(&self) -> Vec<ExportRequest> {
        self.lock().exports.clone()
    }

    pub fn ingests(&self) -> Vec<IngestRequest> {
        self.lock().ingests.clone()
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn get_asset(&self, id: &str) -> Result<Option<AssetInfo>, BackendError> {
        Ok(self.lock().assets.get(id).cloned())
    }

    async fn create(&self, id: &str, kind: AssetKind) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if inner.assets.contains_key(id) {
            return Err(BackendError::Rejected(format!("`{id}` already exists")));
        }
        inner.assets.insert(id.to_string(), AssetInfo::new(id, kind));
        Ok(())
    }

    async fn list_assets(&self, parent: &str) -> Result<Vec<AssetInfo>, BackendError> {
        let inner = self.lock();
        if false == inner.assets.contains_key(parent) {
            return Err(BackendError::NotFound(parent.to_string()));
        }
        let depth = parent.matches('/').count() + 1;
        Ok(inner
            .children(parent)
            .iter()
            .filter(|id| id.matches('/').count() == depth)
            .filter_map(|id| inner.assets.get(id).cloned())
            .collect())
    }

    async fn delete(&self, id: &str, recursive: bool) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if false == inner.assets.contains_key(id) {
            return Err(BackendError::NotFound(id.to_string()));
        }
        let children = inner.children(id);
        if false == children.is_empty() && false == recursive {
            return Err(BackendError::Rejected(format!("`{id}` is not empty")));
        }
        for child in children {
            inner.assets.remove(&child);
        }
        inner.assets.remove(id);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if inner.assets.contains_key(to) {
            return Err(BackendError::Rejected(format!("`{to}` already exists")));
        }
        let Some(mut asset) = inner.assets.remove(from) else {
            return Err(BackendError::NotFound(from.to_string()));
        };
        for child in inner.children(from) {
            if let Some(mut moved) = inner.assets.remove(&child) {
                moved.id = format!("{to}{}", &child[from.len()..]);
                inner.assets.insert(moved.id.clone(), moved);
            }
        }
        asset.id = to.to_string();
        inner.assets.insert(to.to_string(), asset);
        Ok(())
    }

    async fn submit_export(&self, request: ExportRequest) -> Result<JobId, BackendError> {
        let mut inner = self.lock();
        let output = request.asset_id().map(|asset_id| {
            let kind = match request.kind {
                ExportKind::Image => AssetKind::Image,
                ExportKind::Table => AssetKind::Table,
            };
            let mut asset = AssetInfo::new(asset_id, kind);
            if let Some(PropertyValue::Number(t)) = request.properties.get(TIMESTAMP_PROPERTY) {
                asset.time_start = Some(*t);
            }
            asset.properties = request.properties.clone();
            asset.bounds = request.region.clone();
            asset
        });
        inner.exports.push(request);
        Ok(inner.new_job(output))
    }

    async fn ingest(&self, request: IngestRequest) -> Result<JobId, BackendError> {
        let mut inner = self.lock();
        let kind = match request.kind {
            ExportKind::Image => AssetKind::Image,
            ExportKind::Table => AssetKind::Table,
        };
        let output = AssetInfo::new(request.asset_id.clone(), kind);
        inner.ingests.push(request);
        Ok(inner.new_job(Some(output)))
    }

    async fn get_status(&self, ids: &[JobId]) -> Result<Vec<JobStatus>, BackendError> {
        let mut inner = self.lock();
        inner.status_queries += 1;
        if inner.transient_failures > 0 {
            inner.transient_failures -= 1;
            return Err(BackendError::Connection("connection reset by peer".to_string()));
        }

        let mut statuses = vec![];
        for id in ids {
            let Some(job) = inner.jobs.get_mut(id) else {
                statuses.push(JobStatus::new(id.clone(), JobState::Unknown));
                continue;
            };
            let state = if job.states.len() > 1 {
                job.states.pop_front().unwrap_or(JobState::Unknown)
            } else {
                job.states.front().copied().unwrap_or(JobState::Unknown)
            };
            let mut status = JobStatus::new(id.clone(), state);
            let mut output = None;
            match state {
                JobState::Failed => status.error_message = job.error_message.clone(),
                JobState::Completed | JobState::Succeeded => output = job.output.take(),
                _ => {},
            }
            if let Some(asset) = output {
                inner.assets.insert(asset.id.clone(), asset);
            }
            statuses.push(status);
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listing_returns_direct_children_only() {
        let backend = MemoryBackend::new();
        backend.insert_asset(AssetInfo::new("projects/a/ic", AssetKind::ImageCollection));
        backend.insert_asset(AssetInfo::new("projects/a/ic/one", AssetKind::Image));
        backend.insert_asset(AssetInfo::new("projects/a/ic/two", AssetKind::Image));
        backend.insert_asset(AssetInfo::new("projects/a/ic/two/nested", AssetKind::Image));
        backend.insert_asset(AssetInfo::new("projects/a/ic2", AssetKind::Image));

        let children: Vec<String> = backend
            .list_assets("projects/a/ic")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(children, vec!["projects/a/ic/one", "projects/a/ic/two"]);
        assert!(matches!(
            backend.list_assets("projects/missing").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn scripted_job_walks_through_states() {
        let backend = MemoryBackend::new();
        backend.add_job("a", JobScript::new(vec![JobState::Queued, JobState::Running, JobState::Succeeded]));
        let ids = vec!["a".to_string(), "ghost".to_string()];
        let states = |s: Vec<JobStatus>| s.into_iter().map(|s| s.state).collect::<Vec<_>>();
        assert_eq!(states(backend.get_status(&ids).await.unwrap()), vec![JobState::Queued, JobState::Unknown]);
        assert_eq!(states(backend.get_status(&ids).await.unwrap())[0], JobState::Running);
        assert_eq!(states(backend.get_status(&ids).await.unwrap())[0], JobState::Succeeded);
        assert_eq!(states(backend.get_status(&ids).await.unwrap())[0], JobState::Succeeded);
    }
}
