//! HTTP/JSON client for a REST-style asset and operations API.
//!
//! Assets live under `{url}/{asset_id}`, jobs are long-running operations
//! under `{url}/projects/{project}/operations/{id}`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::DateTime;
use futures::future::try_join_all;
use log::debug;
use reqwest::{
    Client,
    RequestBuilder,
    Response,
    StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::backend::{
    AssetInfo, AssetKind, ExportKind, ExportRequest, IngestRequest, JobId, JobState, JobStatus,
    PropertyValue, RemoteBackend,
};
use crate::{
    config::BackendConfig,
    error::{
        BackendError,
        ConfigError,
    },
    geo::Ring,
};

pub const DEFAULT_URL: &str = "https://earthengine.googleapis.com/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestAsset {
    #[serde(rename = "type")]
    kind: AssetKind,

    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    start_time: Option<String>,

    // decoded loosely, remote assets carry arbitrary json values
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    footprint: Option<Ring>,
}

impl RestAsset {
    fn into_info(self, fallback_id: &str) -> AssetInfo {
        let time_start = self.start_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp_millis());
        AssetInfo {
            id: self.id.unwrap_or_else(|| fallback_id.to_string()),
            kind: self.kind,
            time_start: time_start,
            properties: self.properties
                .into_iter()
                .map(|(k, v)| (k, PropertyValue::from_json(v)))
                .collect(),
            bounds: self.footprint,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListAssetsResponse {
    #[serde(default)]
    assets: Vec<RestAsset>,
}

#[derive(Debug, Deserialize)]
struct OperationMetadata {
    state: JobState,

    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,

    #[serde(default)]
    metadata: Option<OperationMetadata>,

    #[serde(default)]
    error: Option<OperationError>,
}

// operation names look like projects/<project>/operations/<id>
fn operation_id(name: &str) -> JobId {
    name.rsplit('/').next().unwrap_or(name).to_string()
}

pub struct RestBackend {
    client: Client,
    url: String,
    project: String,
    access_token: Option<String>,
}

impl RestBackend {
    pub fn new(url: &str, project: &str, access_token: Option<String>) -> Self {
        RestBackend {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            project: project.trim_matches('/').to_string(),
            access_token: access_token,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, ConfigError> {
        let project = config.project
            .as_deref()
            .ok_or(ConfigError::MissingRootNamespace)?;
        Ok(RestBackend::new(
            config.url.as_deref().unwrap_or(DEFAULT_URL),
            project,
            config.access_token.clone(),
        ))
    }

    fn asset_url(&self, id: &str) -> String {
        format!("{}/{}", self.url, id.trim_matches('/'))
    }

    fn project_url(&self, path: &str) -> String {
        format!("{}/projects/{}/{}", self.url, self.project, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => BackendError::NotFound(body),
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                BackendError::Connection(format!("{status}: {body}"))
            },
            _ => BackendError::Rejected(format!("{status}: {body}")),
        })
    }

    async fn start_operation(&self, path: &str, body: serde_json::Value) -> Result<JobId, BackendError> {
        let operation: Operation = self
            .send(self.client.post(self.project_url(path)).json(&body))
            .await?
            .json()
            .await?;
        Ok(operation_id(&operation.name))
    }

    async fn operation(&self, id: &str) -> Result<JobStatus, BackendError> {
        let response = self
            .send(self.client.get(self.project_url(&format!("operations/{id}"))))
            .await;
        let operation: Operation = match response {
            Ok(response) => response.json().await?,
            // forgotten by the backend
            Err(BackendError::NotFound(_)) => return Ok(JobStatus::new(id, JobState::Unknown)),
            Err(e) => return Err(e),
        };
        let (state, description) = match operation.metadata {
            Some(m) => (m.state, m.description),
            None => (JobState::Unknown, None),
        };
        Ok(JobStatus {
            id: id.to_string(),
            state: state,
            description: description,
            error_message: operation.error.map(|e| e.message),
        })
    }
}

#[async_trait]
impl RemoteBackend for RestBackend {
    async fn get_asset(&self, id: &str) -> Result<Option<AssetInfo>, BackendError> {
        match self.send(self.client.get(self.asset_url(id))).await {
            Ok(response) => {
                let asset: RestAsset = response.json().await?;
                Ok(Some(asset.into_info(id)))
            },
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, id: &str, kind: AssetKind) -> Result<(), BackendError> {
        let request = self.client
            .post(self.project_url("assets"))
            .query(&[("assetId", id)])
            .json(&json!({ "type": kind }));
        self.send(request).await?;
        Ok(())
    }

    async fn list_assets(&self, parent: &str) -> Result<Vec<AssetInfo>, BackendError> {
        let url = format!("{}:listAssets", self.asset_url(parent));
        let listing: ListAssetsResponse = self.send(self.client.get(url)).await?.json().await?;
        Ok(listing.assets
            .into_iter()
            .map(|a| a.into_info(parent))
            .collect())
    }

    async fn delete(&self, id: &str, recursive: bool) -> Result<(), BackendError> {
        if true == recursive {
            for child in self.list_assets(id).await? {
                self.delete(&child.id, child.kind.is_container()).await?;
            }
        }
        debug!("Deleting `{id}`.");
        self.send(self.client.delete(self.asset_url(id))).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), BackendError> {
        let url = format!("{}:move", self.asset_url(from));
        self.send(self.client.post(url).json(&json!({ "destinationName": to }))).await?;
        Ok(())
    }

    async fn submit_export(&self, request: ExportRequest) -> Result<JobId, BackendError> {
        let path = match request.kind {
            ExportKind::Image => "image:export",
            ExportKind::Table => "table:export",
        };
        self.start_operation(path, serde_json::to_value(&request).map_err(|e| {
            BackendError::Decode(e.to_string())
        })?)
        .await
    }

    async fn ingest(&self, request: IngestRequest) -> Result<JobId, BackendError> {
        let path = match request.kind {
            ExportKind::Image => "image:import",
            ExportKind::Table => "table:import",
        };
        self.start_operation(path, serde_json::to_value(&request).map_err(|e| {
            BackendError::Decode(e.to_string())
        })?)
        .await
    }

    async fn get_status(&self, ids: &[JobId]) -> Result<Vec<JobStatus>, BackendError> {
        let statuses = try_join_all(ids.iter().map(|id| self.operation(id))).await?;
        debug!("Remote job states: {statuses:?}");
        Ok(statuses)
    }
}
