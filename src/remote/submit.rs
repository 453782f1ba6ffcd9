use std::{
    collections::BTreeMap,
    path::Path,
};

use chrono::NaiveDate;
use log::info;

use super::{
    backend::{
        ExportDestination, ExportKind, ExportRequest, IngestRequest, JobId,
    },
    Orchestrator,
};
use crate::{
    error::{
        BackendError,
        TaskError,
    },
    geo::Ring,
    transfer::ObjectStore,
};

/// Options for exporting an image into the asset namespace.
#[derive(Debug, Clone)]
pub struct ImageExport {
    // the destination folder is an image collection
    pub image_collection: bool,

    // defaults to the task extent
    pub region: Option<Ring>,

    // defaults to `.default = mean`
    pub pyramiding: Option<BTreeMap<String, String>>,

    // name the output after this date instead of the task date
    pub pathdate: Option<NaiveDate>,
}

impl Default for ImageExport {
    fn default() -> Self {
        ImageExport {
            image_collection: true,
            region: None,
            pyramiding: None,
            pathdate: None,
        }
    }
}

fn blob_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

impl Orchestrator {
    fn region_or_extent(&self, region: Option<Ring>) -> Option<Ring> {
        region.or_else(|| self.geo.extent().cloned())
    }

    // submit and start tracking
    async fn submit(&mut self, request: ExportRequest) -> Result<JobId, BackendError> {
        let description = request.description.clone();
        let job_id = self.backend.submit_export(request).await?;
        info!("Submitted `{description}` as remote job `{job_id}`.");
        self.track_job(job_id.clone());
        Ok(job_id)
    }

    /// Export an image under `asset_path` (relative to the root), named after
    /// the task date. Returns the remote job id.
    pub async fn export_image(
        &mut self,
        image: serde_json::Value,
        asset_path: &str,
        options: ImageExport,
    ) -> Result<JobId, BackendError> {
        let properties = self.export_properties();
        let (image_name, asset_id) = self
            .prepare_asset_id(asset_path, options.image_collection, options.pathdate)
            .await?;
        let pyramiding = options.pyramiding.unwrap_or_else(|| {
            BTreeMap::from([(".default".to_string(), "mean".to_string())])
        });

        let request = ExportRequest {
            kind: ExportKind::Image,
            description: image_name,
            source: image,
            destination: ExportDestination::Asset {
                asset_id: asset_id,
                pyramiding: pyramiding,
            },
            region: self.region_or_extent(options.region),
            scale: Some(self.geo.scale()),
            crs: Some(self.geo.crs().to_string()),
            max_pixels: Some(self.limits.max_pixels),
            properties: properties,
        };
        self.submit(request).await
    }

    /// Export a feature collection under `asset_path` (relative to the root).
    pub async fn export_table(
        &mut self,
        table: serde_json::Value,
        asset_path: &str,
    ) -> Result<JobId, BackendError> {
        let properties = self.export_properties();
        let (table_name, asset_id) = self.prepare_asset_id(asset_path, false, None).await?;
        let request = ExportRequest {
            kind: ExportKind::Table,
            description: table_name,
            source: table,
            destination: ExportDestination::Asset {
                asset_id: asset_id,
                pyramiding: BTreeMap::new(),
            },
            region: None,
            scale: None,
            crs: None,
            max_pixels: None,
            properties: properties,
        };
        self.submit(request).await
    }

    /// Export an image as a cloud-optimized GeoTIFF into an object-store bucket.
    pub async fn image_to_storage(
        &mut self,
        image: serde_json::Value,
        bucket: &str,
        path: &str,
        region: Option<Ring>,
    ) -> Result<JobId, BackendError> {
        let request = ExportRequest {
            kind: ExportKind::Image,
            description: blob_name(path),
            source: image,
            destination: ExportDestination::Storage {
                bucket: bucket.to_string(),
                prefix: path.to_string(),
                format: "GeoTIFF".to_string(),
                selectors: None,
            },
            region: self.region_or_extent(region),
            scale: Some(self.geo.scale()),
            crs: Some(self.geo.crs().to_string()),
            max_pixels: Some(self.limits.max_pixels),
            properties: self.export_properties(),
        };
        self.submit(request).await
    }

    /// Export a feature collection into an object-store bucket.
    pub async fn table_to_storage(
        &mut self,
        table: serde_json::Value,
        bucket: &str,
        path: &str,
        format: Option<&str>,
        selectors: Option<Vec<String>>,
    ) -> Result<JobId, BackendError> {
        let request = ExportRequest {
            kind: ExportKind::Table,
            description: blob_name(path),
            source: table,
            destination: ExportDestination::Storage {
                bucket: bucket.to_string(),
                prefix: path.to_string(),
                format: format.unwrap_or("GeoJSON").to_string(),
                selectors: selectors,
            },
            region: None,
            scale: None,
            crs: None,
            max_pixels: None,
            properties: self.export_properties(),
        };
        self.submit(request).await
    }

    async fn ingest(&mut self, request: IngestRequest) -> Result<JobId, BackendError> {
        let job_id = self.backend.ingest(request.clone()).await?;
        info!(
            "Ingesting `{}` into `{}` as remote job `{job_id}`.",
            request.source_uri, request.asset_id
        );
        self.track_job(job_id.clone());
        Ok(job_id)
    }

    /// Hand a stored raster to the backend's ingestion.
    pub async fn ingest_image(
        &mut self,
        source_uri: &str,
        asset_id: &str,
        nodata: Option<i64>,
    ) -> Result<JobId, BackendError> {
        self.ingest(IngestRequest {
            kind: ExportKind::Image,
            source_uri: source_uri.to_string(),
            asset_id: asset_id.to_string(),
            nodata: nodata,
            geometry_column: None,
        })
        .await
    }

    /// Hand a stored table to the backend's ingestion.
    pub async fn ingest_table(
        &mut self,
        source_uri: &str,
        asset_id: &str,
        geometry_column: Option<&str>,
    ) -> Result<JobId, BackendError> {
        self.ingest(IngestRequest {
            kind: ExportKind::Table,
            source_uri: source_uri.to_string(),
            asset_id: asset_id.to_string(),
            nodata: None,
            geometry_column: geometry_column.map(str::to_string),
        })
        .await
    }

    /// Upload a local raster to the store and ingest it under `asset_path`
    /// (relative to the root, date-suffixed like any export).
    pub async fn upload_image(
        &mut self,
        store: &dyn ObjectStore,
        local: &Path,
        key: &str,
        asset_path: &str,
        nodata: Option<i64>,
    ) -> Result<JobId, TaskError> {
        let uri = store.upload(local, key).await?;
        let (_, asset_id) = self.prepare_asset_id(asset_path, true, None).await?;
        Ok(self.ingest_image(&uri, &asset_id, nodata).await?)
    }
}
