//! SynthStrip tooling and the FLAMeS model archive
//!
//! Both are fetched only when no verified copy exists in the workspace.

use std::path::{Path, PathBuf};

use super::downloader::{self, FetchSource};
use super::extractor::verify_archive;
use super::paths::Workspace;
use crate::config::{
    DATASET_NAME, MODEL_ARCHIVE_NAME, SYNTHSTRIP_SCRIPT_URL, SYNTHSTRIP_WEIGHTS_URL,
    ZENODO_RECORD_ID,
};
use crate::error::FetchError;

/// Local copies of the SynthStrip script and its weights
#[derive(Debug, Clone)]
pub struct SynthStripAssets {
    pub script: PathBuf,
    pub weights: PathBuf,
}

/// Ensure `mri_synthstrip` and `synthstrip.1.pt` exist under `tools/synthstrip`
pub async fn ensure_synthstrip(
    source: &dyn FetchSource,
    workspace: &Workspace,
) -> Result<SynthStripAssets, FetchError> {
    let script = workspace.synthstrip_script_path();
    let weights = workspace.synthstrip_weights_path();

    if downloader::ensure_file(source, SYNTHSTRIP_SCRIPT_URL, &script).await? {
        tracing::info!(path = %script.display(), "Downloaded mri_synthstrip");
    }
    if downloader::ensure_file(source, SYNTHSTRIP_WEIGHTS_URL, &weights).await? {
        tracing::info!(path = %weights.display(), "Downloaded synthstrip.1.pt");
    }

    Ok(SynthStripAssets { script, weights })
}

fn archive_is_usable(path: &Path) -> bool {
    match verify_archive(path) {
        Ok(info) => {
            if !info.contains_top_level(DATASET_NAME) {
                tracing::warn!(path = %path.display(), "Model archive has no {} folder", DATASET_NAME);
            }
            true
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable model archive");
            false
        }
    }
}

/// Ensure the model archive exists in the model cache.
/// Returns its path and whether it was downloaded by this call.
///
/// The record is only resolved when a download is actually needed.
pub async fn ensure_model_archive(
    source: &dyn FetchSource,
    workspace: &Workspace,
) -> Result<(PathBuf, bool), FetchError> {
    let zip_path = workspace.model_archive_path();

    if downloader::is_present(&zip_path).await && archive_is_usable(&zip_path) {
        tracing::info!(path = %zip_path.display(), "Model zip found");
        return Ok((zip_path, false));
    }

    tokio::fs::create_dir_all(workspace.model_cache_dir())
        .await
        .map_err(|e| FetchError::io(zip_path.display().to_string(), e.to_string()))?;

    tracing::info!(record = ZENODO_RECORD_ID, "Downloading FLAMeS model from Zenodo...");
    let remote = source.resolve_record_file(ZENODO_RECORD_ID, MODEL_ARCHIVE_NAME).await?;
    downloader::download_verified(source, &remote.url, &zip_path, remote.size).await?;

    if let Err(e) = verify_archive(&zip_path) {
        let _ = tokio::fs::remove_file(downloader::sentinel_path(&zip_path)).await;
        return Err(FetchError::archive(remote.url, e.to_string()));
    }

    Ok((zip_path, true))
}
