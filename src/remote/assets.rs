use chrono::NaiveDate;
use log::{
    debug, info, warn
};

use super::{
    backend::AssetKind,
    Orchestrator,
};
use crate::{
    error::{
        BackendError,
        ConfigError,
        TaskError,
    },
    task::DATE_FORMAT,
};

/// An overwrite in flight: the output was written to `temporary` and will
/// replace `intended` once the run succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPair {
    pub intended: String,

    pub temporary: String,
}

// spaces are not allowed in asset ids
fn sanitize_asset_id(asset_id: &str) -> String {
    asset_id
        .split('/')
        .map(|s| s.replace(' ', "_"))
        .collect::<Vec<_>>()
        .join("/")
}

impl Orchestrator {
    /// Turn a desired asset id into one that is safe to write.
    ///
    /// A free id is returned unchanged. A taken id gets the lowest free `-N`
    /// suffix; with overwrite on, that suffixed id is only a temporary and the
    /// pair is recorded so `commit_transactions` can swap it in later.
    pub async fn canonicalize_asset_id(&mut self, asset_id: &str) -> Result<String, BackendError> {
        let asset_id = sanitize_asset_id(asset_id);
        if false == self.backend.exists(&asset_id).await? {
            return Ok(asset_id);
        }

        let mut suffix = 1u32;
        let mut candidate = format!("{asset_id}-{suffix}");
        while self.backend.exists(&candidate).await? {
            suffix += 1;
            candidate = format!("{asset_id}-{suffix}");
        }

        if true == self.overwrite {
            debug!("`{asset_id}` exists, writing to `{candidate}` until the run succeeds.");
            self.transactions.push(TransactionPair {
                intended: asset_id,
                temporary: candidate.clone(),
            });
        } else {
            info!("`{asset_id}` exists, using `{candidate}` instead.");
        }
        Ok(candidate)
    }

    /// Create any missing folders under the root for `asset_path` and return
    /// `(asset_name, asset_id)` for the date-suffixed output.
    ///
    /// The first two segments (e.g. `projects/HII`) are the account root and
    /// are never created. With `image_collection` the last node is created as
    /// an image collection instead of a folder.
    pub async fn prepare_asset_id(
        &mut self,
        asset_path: &str,
        image_collection: bool,
        pathdate: Option<NaiveDate>,
    ) -> Result<(String, String), BackendError> {
        let asset_path = self.absolute(asset_path);
        let segments: Vec<&str> = asset_path.split('/').collect();
        let asset_name = segments.last().copied().unwrap_or_default().to_string();
        let pathdate = pathdate.unwrap_or(self.taskdate);

        for i in 2..segments.len() {
            let path = segments[..=i].join("/");
            if self.backend.exists(&path).await? {
                continue;
            }
            let kind = if i == segments.len() - 1 && image_collection {
                AssetKind::ImageCollection
            } else {
                AssetKind::Folder
            };
            info!("Creating {kind:?} `{path}`.");
            self.backend.create(&path, kind).await?;
        }

        let asset_id = self.canonicalize_asset_id(&format!(
            "{asset_path}/{asset_name}_{}",
            pathdate.format(DATE_FORMAT)
        ))
        .await?;
        Ok((asset_name, asset_id))
    }

    /// Remove an asset under the root. Folders and collections go recursively.
    /// Returns false when there was nothing to remove.
    pub async fn remove_asset(&self, asset_path: &str, dry_run: bool) -> Result<bool, BackendError> {
        self.remove_asset_id(&self.absolute(asset_path), dry_run).await
    }

    /// Rename an asset under the root. Refuses when the source is missing or
    /// the destination is taken.
    pub async fn move_asset(&self, old_path: &str, new_path: &str) -> Result<bool, BackendError> {
        self.move_asset_id(&self.absolute(old_path), &self.absolute(new_path)).await
    }

    pub(crate) async fn remove_asset_id(&self, asset_id: &str, dry_run: bool) -> Result<bool, BackendError> {
        let asset = match self.backend.get_asset(asset_id).await? {
            Some(asset) => asset,
            None => {
                warn!("`{asset_id}` does not exist");
                return Ok(false);
            }
        };
        if true == dry_run {
            info!("Would remove {:?} `{asset_id}`.", asset.kind);
            return Ok(true);
        }
        self.backend.delete(asset_id, asset.kind.is_container()).await?;
        Ok(true)
    }

    pub(crate) async fn move_asset_id(&self, old_id: &str, new_id: &str) -> Result<bool, BackendError> {
        if false == self.backend.exists(old_id).await? {
            warn!("`{old_id}` does not exist");
            return Ok(false);
        }
        if self.backend.exists(new_id).await? {
            warn!("`{new_id}` already exists");
            return Ok(false);
        }
        self.backend.rename(old_id, new_id).await?;
        Ok(true)
    }

    /// Promote every temporary output onto its intended id: delete the old
    /// asset, then rename the new one into place. Only called after a
    /// successful run with overwrite on.
    ///
    /// Nothing is deleted unless every temporary output exists; a job that
    /// ended without writing its output leaves all intended assets intact.
    pub async fn commit_transactions(&mut self) -> Result<(), BackendError> {
        if false == self.overwrite {
            return Ok(());
        }
        for pair in &self.transactions {
            if false == self.backend.exists(&pair.temporary).await? {
                return Err(BackendError::NotFound(format!(
                    "`{}` was never written, keeping `{}`",
                    pair.temporary, pair.intended
                )));
            }
        }
        while let Some(pair) = self.transactions.first().cloned() {
            info!("Replacing `{}` with `{}`.", pair.intended, pair.temporary);
            self.remove_asset_id(&pair.intended, false).await?;
            if false == self.move_asset_id(&pair.temporary, &pair.intended).await? {
                return Err(BackendError::Rejected(format!(
                    "could not move `{}` to `{}`",
                    pair.temporary, pair.intended
                )));
            }
            self.transactions.remove(0);
        }
        Ok(())
    }

    /// Set aoi and extent from the footprint the backend reports for an
    /// image or feature collection.
    pub async fn set_aoi_from_asset(&mut self, asset_id: &str) -> Result<(), TaskError> {
        let asset = self.backend
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| BackendError::NotFound(asset_id.to_string()))?;
        let bounds = asset.bounds
            .ok_or_else(|| ConfigError::NoBounds(asset_id.to_string()))?;
        self.geo.set_aoi_from_bounds(&bounds)?;
        Ok(())
    }
}
