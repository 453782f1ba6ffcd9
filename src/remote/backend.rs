//! Contract of the remote compute backend and the payloads it exchanges.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{
    Serialize, Deserialize
};

use crate::{
    error::BackendError,
    geo::Ring,
};

pub type JobId = String;

/// State of a remote job as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[serde(alias = "READY", alias = "PENDING")]
    Queued,

    #[serde(alias = "CANCELLING")]
    Running,

    Completed,

    Succeeded,

    Failed,

    Cancelled,

    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,

    pub state: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobStatus {
    pub fn new(id: impl Into<JobId>, state: JobState) -> Self {
        JobStatus {
            id: id.into(),
            state: state,
            description: None,
            error_message: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetKind {
    Image,

    ImageCollection,

    #[serde(alias = "FEATURE_COLLECTION")]
    Table,

    Folder,
}

impl AssetKind {
    // containers are removed recursively
    pub fn is_container(&self) -> bool {
        matches!(self, AssetKind::Folder | AssetKind::ImageCollection)
    }
}

/// An asset property. Exports only ever write `Number` and `Text`; assets
/// read back from a backend may also carry floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(i64),

    Float(f64),

    Text(String),
}

impl PropertyValue {
    // anything that is neither a number nor a string is kept as its json text
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Number(i),
                None => PropertyValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => PropertyValue::Text(s),
            other => PropertyValue::Text(other.to_string()),
        }
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: String,

    pub kind: AssetKind,

    // epoch millis of the `system:time_start` property
    #[serde(default)]
    pub time_start: Option<i64>,

    #[serde(default)]
    pub properties: Properties,

    // outer ring of the asset footprint, if the backend knows it
    #[serde(default)]
    pub bounds: Option<Ring>,
}

impl AssetInfo {
    pub fn new(id: impl Into<String>, kind: AssetKind) -> Self {
        AssetInfo {
            id: id.into(),
            kind: kind,
            time_start: None,
            properties: BTreeMap::new(),
            bounds: None,
        }
    }

    pub fn with_time_start(mut self, millis: i64) -> Self {
        self.time_start = Some(millis);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportKind {
    Image,

    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportDestination {
    Asset {
        asset_id: String,

        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        pyramiding: BTreeMap<String, String>,
    },

    Storage {
        bucket: String,

        prefix: String,

        format: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        selectors: Option<Vec<String>>,
    },
}

/// Everything the backend needs to run one export job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub kind: ExportKind,

    pub description: String,

    // backend expression describing the element to export, opaque here
    pub source: serde_json::Value,

    pub destination: ExportDestination,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Ring>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pixels: Option<u64>,

    pub properties: Properties,
}

impl ExportRequest {
    pub fn asset_id(&self) -> Option<&str> {
        match &self.destination {
            ExportDestination::Asset { asset_id, .. } => Some(asset_id),
            ExportDestination::Storage { .. } => None,
        }
    }
}

/// Load a stored blob into the asset namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub kind: ExportKind,

    pub source_uri: String,

    pub asset_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodata: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_column: Option<String>,
}

/// A remote, asynchronous compute service with a hierarchical asset namespace.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Asset metadata, or `None` when nothing lives at `id`.
    async fn get_asset(&self, id: &str) -> Result<Option<AssetInfo>, BackendError>;

    async fn exists(&self, id: &str) -> Result<bool, BackendError> {
        Ok(self.get_asset(id).await?.is_some())
    }

    async fn create(&self, id: &str, kind: AssetKind) -> Result<(), BackendError>;

    /// Direct children of a folder or collection.
    async fn list_assets(&self, parent: &str) -> Result<Vec<AssetInfo>, BackendError>;

    async fn delete(&self, id: &str, recursive: bool) -> Result<(), BackendError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), BackendError>;

    async fn submit_export(&self, request: ExportRequest) -> Result<JobId, BackendError>;

    async fn ingest(&self, request: IngestRequest) -> Result<JobId, BackendError>;

    async fn get_status(&self, ids: &[JobId]) -> Result<Vec<JobStatus>, BackendError>;
}
