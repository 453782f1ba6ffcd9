//! Object-store collaborator used to move blobs in and out of the backend.

use std::{
    io::ErrorKind,
    path::{
        Path, PathBuf,
    },
};

use async_trait::async_trait;
use log::{
    debug, warn
};

use crate::error::TransferError;

pub const DEFAULT_BUCKET: &str = "geotask-pipeline";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file; returns the uri the backend can ingest from.
    async fn upload(&self, local: &Path, key: &str) -> Result<String, TransferError>;

    async fn download(&self, key: &str, local: &Path) -> Result<PathBuf, TransferError>;

    async fn delete(&self, key: &str) -> Result<(), TransferError>;
}

/// Delete a blob without failing the task if it is already gone.
pub async fn remove_blob(store: &dyn ObjectStore, key: &str) -> Result<(), TransferError> {
    match store.delete(key).await {
        Err(TransferError::NotFound(_)) => {
            warn!("`{key}` not found");
            Ok(())
        },
        other => other,
    }
}

/// A bucket laid out as a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: Option<&str>) -> Self {
        LocalObjectStore {
            root: root.into(),
            bucket: bucket.unwrap_or(DEFAULT_BUCKET).to_string(),
        }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(&self.bucket).join(key.trim_start_matches('/'))
    }
}

fn not_found(key: &str, err: std::io::Error) -> TransferError {
    if err.kind() == ErrorKind::NotFound {
        TransferError::NotFound(key.to_string())
    } else {
        TransferError::Io(err)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, local: &Path, key: &str) -> Result<String, TransferError> {
        let target = self.blob_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &target).await?;
        debug!("Uploaded `{}` to `{}`.", local.display(), target.display());
        Ok(format!("file://{}", target.display()))
    }

    async fn download(&self, key: &str, local: &Path) -> Result<PathBuf, TransferError> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(self.blob_path(key), local)
            .await
            .map_err(|e| not_found(key, e))?;
        Ok(local.to_path_buf())
    }

    async fn delete(&self, key: &str) -> Result<(), TransferError> {
        tokio::fs::remove_file(self.blob_path(key))
            .await
            .map_err(|e| not_found(key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_download_and_forgiving_delete() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("hii_2001.tif");
        tokio::fs::write(&local, b"not really a tiff").await.unwrap();

        let store = LocalObjectStore::new(dir.path().join("store"), Some("hii-export"));
        let uri = store.upload(&local, "hii/2001/hii.tif").await.unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with("hii-export/hii/2001/hii.tif"));

        let back = dir.path().join("back/hii.tif");
        let path = store.download("hii/2001/hii.tif", &back).await.unwrap();
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"not really a tiff");

        remove_blob(&store, "hii/2001/hii.tif").await.unwrap();
        assert!(matches!(
            store.delete("hii/2001/hii.tif").await,
            Err(TransferError::NotFound(_))
        ));
        remove_blob(&store, "hii/2001/hii.tif").await.unwrap();
    }

    #[tokio::test]
    async fn missing_blob_download_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), None);
        let err = store.download("nope", &dir.path().join("x")).await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
    }
}
