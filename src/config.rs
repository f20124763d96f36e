//! Pipeline configuration
//!
//! Fixed remote identifiers for the FLAMeS model and SynthStrip, plus the
//! per-run configuration assembled from the command line.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// nnU-Net dataset folder the FLAMeS archive installs into
pub const DATASET_NAME: &str = "Dataset004_WML";
/// Dataset id passed to `nnUNetv2_predict -d`
pub const DATASET_ID: &str = "004";
pub const CONFIGURATION: &str = "3d_fullres";
pub const TRAINER: &str = "nnUNetTrainer_8000epochs";

/// Zenodo record holding the model archive
pub const ZENODO_RECORD_ID: &str = "17955359";
pub const ZENODO_API_BASE: &str = "https://zenodo.org/api/records";
pub const MODEL_ARCHIVE_NAME: &str = "Dataset004_WML.zip";

pub const SYNTHSTRIP_SCRIPT_URL: &str =
    "https://raw.githubusercontent.com/freesurfer/freesurfer/dev/mri_synthstrip/mri_synthstrip";
pub const SYNTHSTRIP_WEIGHTS_URL: &str =
    "https://surfer.nmr.mgh.harvard.edu/docs/synthstrip/requirements/synthstrip.1.pt";
pub const SYNTHSTRIP_SCRIPT_NAME: &str = "mri_synthstrip";
pub const SYNTHSTRIP_WEIGHTS_NAME: &str = "synthstrip.1.pt";

pub const NNUNET_INSTALL_TOOL: &str = "nnUNetv2_install_pretrained_model_from_zip";
pub const NNUNET_PREDICT_TOOL: &str = "nnUNetv2_predict";

/// Execution device for stripping and inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }

    /// Effective device given accelerator availability. Only ever downgrades.
    pub fn resolve(self, accelerator_available: bool) -> Device {
        match self {
            Device::Cuda if !accelerator_available => Device::Cpu,
            other => other,
        }
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self, Device::Cuda)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a pipeline run needs to know up front
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Overrides `<output>/flames_model`
    pub model_cache: Option<PathBuf>,
    pub skip_preprocessing: bool,
    pub device: Device,
    /// Interpreter used to run SynthStrip and the torch GPU check
    pub python: String,
    /// Run inference even when no volume could be skull-stripped
    pub allow_empty: bool,
}

impl PipelineConfig {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            model_cache: None,
            skip_preprocessing: false,
            device: Device::Cuda,
            python: "python".to_string(),
            allow_empty: false,
        }
    }
}
