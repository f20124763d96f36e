//! Path utilities for run locations
//!
//! Everything a run writes lives under the output directory:
//! `work_dir/`, `skull_stripped/`, `flames_model/`, `segmentations/`, `tools/`.

use std::path::{Path, PathBuf};

use crate::config::{
    DATASET_NAME, MODEL_ARCHIVE_NAME, SYNTHSTRIP_SCRIPT_NAME, SYNTHSTRIP_WEIGHTS_NAME,
};

pub const NNUNET_RAW: &str = "nnUNet_raw";
pub const NNUNET_PREPROCESSED: &str = "nnUNet_preprocessed";
pub const NNUNET_RESULTS: &str = "nnUNet_results";

/// Layout of one output directory
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    model_cache: PathBuf,
}

impl Workspace {
    /// `model_cache` overrides the default `<root>/flames_model`
    pub fn new(root: impl Into<PathBuf>, model_cache: Option<PathBuf>) -> Self {
        let root = root.into();
        let model_cache = model_cache.unwrap_or_else(|| root.join("flames_model"));
        Self { root, model_cache }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base directory for the nnU-Net runtime folders
    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work_dir")
    }

    pub fn skull_stripped_dir(&self) -> PathBuf {
        self.root.join("skull_stripped")
    }

    pub fn model_cache_dir(&self) -> &Path {
        &self.model_cache
    }

    pub fn model_archive_path(&self) -> PathBuf {
        self.model_cache.join(MODEL_ARCHIVE_NAME)
    }

    pub fn segmentations_dir(&self) -> PathBuf {
        self.root.join("segmentations")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.root.join("tools")
    }

    pub fn synthstrip_dir(&self) -> PathBuf {
        self.tools_dir().join("synthstrip")
    }

    pub fn synthstrip_script_path(&self) -> PathBuf {
        self.synthstrip_dir().join(SYNTHSTRIP_SCRIPT_NAME)
    }

    pub fn synthstrip_weights_path(&self) -> PathBuf {
        self.synthstrip_dir().join(SYNTHSTRIP_WEIGHTS_NAME)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("run_summary.json")
    }
}

/// The three nnU-Net runtime folders.
///
/// nnU-Net reads them from environment variables, so they are handed to each
/// child process through [`NnUnetEnv::vars`] instead of the parent's env.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NnUnetEnv {
    pub raw: PathBuf,
    pub preprocessed: PathBuf,
    pub results: PathBuf,
}

impl NnUnetEnv {
    pub fn for_base(base_dir: &Path) -> Self {
        Self {
            raw: base_dir.join(NNUNET_RAW),
            preprocessed: base_dir.join(NNUNET_PREPROCESSED),
            results: base_dir.join(NNUNET_RESULTS),
        }
    }

    /// Derive the folders under `base_dir` and create any that are missing
    pub fn setup(base_dir: &Path) -> std::io::Result<Self> {
        let env = Self::for_base(base_dir);
        for (key, path) in env.vars() {
            std::fs::create_dir_all(&path)?;
            tracing::info!("Set {}={}", key, path.display());
        }
        Ok(env)
    }

    pub fn vars(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            (NNUNET_RAW, self.raw.clone()),
            (NNUNET_PREPROCESSED, self.preprocessed.clone()),
            (NNUNET_RESULTS, self.results.clone()),
        ]
    }

    /// Registry entry the FLAMeS model installs into
    pub fn installed_model_dir(&self) -> PathBuf {
        self.results.join(DATASET_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_model_cache_under_output() {
        let ws = Workspace::new("/out", None);
        assert_eq!(ws.model_cache_dir(), Path::new("/out/flames_model"));
        assert_eq!(ws.model_archive_path(), PathBuf::from("/out/flames_model/Dataset004_WML.zip"));
    }

    #[test]
    fn test_model_cache_override() {
        let ws = Workspace::new("/out", Some(PathBuf::from("/cache")));
        assert_eq!(ws.model_archive_path(), PathBuf::from("/cache/Dataset004_WML.zip"));
        assert_eq!(ws.segmentations_dir(), PathBuf::from("/out/segmentations"));
    }

    #[test]
    fn test_setup_creates_runtime_dirs() {
        let dir = tempdir().unwrap();
        let env = NnUnetEnv::setup(&dir.path().join("work_dir")).unwrap();
        assert!(env.raw.is_dir());
        assert!(env.preprocessed.is_dir());
        assert!(env.results.is_dir());
        assert_eq!(
            env.installed_model_dir(),
            dir.path().join("work_dir/nnUNet_results/Dataset004_WML")
        );
    }

    #[test]
    fn test_setup_is_idempotent() {
        let dir = tempdir().unwrap();
        let first = NnUnetEnv::setup(dir.path()).unwrap();
        let second = NnUnetEnv::setup(dir.path()).unwrap();
        assert_eq!(first, second);
    }
}
