//! Pipeline Orchestration
//!
//! Runs the stages in a fixed order:
//! validate input → runtime paths → device check → skull stripping (optional)
//! → model archive → model install (if needed) → inference → summary.

pub mod inference;
pub mod model;
pub mod skullstrip;


use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Device, PipelineConfig};
use crate::error::{FlamesError, FlamesResult};
use crate::hardware::GpuDetector;
use crate::setup::assets::{ensure_model_archive, ensure_synthstrip};
use crate::setup::downloader::FetchSource;
use crate::setup::{NnUnetEnv, Workspace};
use crate::tools::CommandRunner;

use model::ModelInstaller;
use skullstrip::{discover_volumes, SkullStripper, StripReport};

/// What a successful run did, written to `run_summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub requested_device: Device,
    pub device: Device,
    pub input_dir: PathBuf,
    /// Directory handed to nnU-Net (stripped or raw input)
    pub inference_input: PathBuf,
    pub segmentations_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skull_stripping: Option<StripReport>,
    pub model_archive: PathBuf,
    pub model_downloaded: bool,
    pub model_installed: bool,
}

pub struct Pipeline {
    config: PipelineConfig,
    runner: Arc<dyn CommandRunner>,
    fetcher: Arc<dyn FetchSource>,
    gpu: Arc<dyn GpuDetector>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        fetcher: Arc<dyn FetchSource>,
        gpu: Arc<dyn GpuDetector>,
    ) -> Self {
        Self {
            config,
            runner,
            fetcher,
            gpu,
        }
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.config.output_dir, self.config.model_cache.clone())
    }

    /// Fails without touching the filesystem
    pub fn validate(&self) -> FlamesResult<()> {
        if !self.config.input_dir.is_dir() {
            return Err(FlamesError::Input(format!(
                "Input directory '{}' does not exist.",
                self.config.input_dir.display()
            )));
        }
        Ok(())
    }

    pub async fn run(&self) -> FlamesResult<RunSummary> {
        let started_at = Utc::now();
        self.validate()?;

        let workspace = self.workspace();
        tokio::fs::create_dir_all(workspace.root()).await?;

        let env = NnUnetEnv::setup(&workspace.work_dir())?;

        let requested_device = self.config.device;
        let device = requested_device.resolve(self.gpu.accelerator_available().await);
        if device != requested_device {
            tracing::warn!("Switching to CPU mode as GPU is not available.");
        }

        let (inference_input, skull_stripping) = if self.config.skip_preprocessing {
            tracing::info!("Skipping preprocessing as requested.");
            self.check_raw_input()?;
            (self.config.input_dir.clone(), None)
        } else {
            tracing::info!("[Stage 1/2] Preprocessing (Skull Stripping)...");
            let report = self.preprocess(&workspace, device).await?;
            (workspace.skull_stripped_dir(), Some(report))
        };

        tracing::info!("[Stage 2/2] Inference (Lesion Segmentation)...");
        let (model_archive, model_downloaded) = ensure_model_archive(self.fetcher.as_ref(), &workspace).await?;

        let model_installed = ModelInstaller::new(self.runner.as_ref(), &env)
            .ensure_installed(&model_archive)
            .await?;

        let segmentations_dir = workspace.segmentations_dir();
        inference::run_inference(self.runner.as_ref(), &env, &inference_input, &segmentations_dir, device).await?;

        let summary = RunSummary {
            run_id: uuid::Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            requested_device,
            device,
            input_dir: self.config.input_dir.clone(),
            inference_input,
            segmentations_dir,
            skull_stripping,
            model_archive,
            model_downloaded,
            model_installed,
        };
        write_summary(&workspace.summary_path(), &summary).await?;

        Ok(summary)
    }

    async fn preprocess(&self, workspace: &Workspace, device: Device) -> FlamesResult<StripReport> {
        let assets = ensure_synthstrip(self.fetcher.as_ref(), workspace).await?;
        let stripper = SkullStripper::new(self.runner.as_ref(), &self.config.python, &assets);
        let report = stripper
            .run_batch(&self.config.input_dir, &workspace.skull_stripped_dir(), device)
            .await?;

        for failed in report.failed() {
            tracing::warn!(source = %failed.source.display(), "Volume was not skull-stripped");
        }

        if report.usable_count() == 0 {
            let message = format!(
                "no volumes were skull-stripped ({} found in '{}')",
                report.outcomes.len(),
                self.config.input_dir.display()
            );
            if self.config.allow_empty {
                tracing::warn!("{}; continuing because --allow-empty is set", message);
            } else {
                return Err(FlamesError::Input(message));
            }
        }
        Ok(report)
    }

    fn check_raw_input(&self) -> FlamesResult<()> {
        let volumes = discover_volumes(&self.config.input_dir)?;
        if volumes.is_empty() {
            let message = format!("no NIfTI volumes found in '{}'", self.config.input_dir.display());
            if self.config.allow_empty {
                tracing::warn!("{}; continuing because --allow-empty is set", message);
            } else {
                return Err(FlamesError::Input(message));
            }
        }
        Ok(())
    }
}

async fn write_summary(path: &Path, summary: &RunSummary) -> FlamesResult<()> {
    let json = serde_json::to_string_pretty(summary).map_err(|e| FlamesError::FileSystem(e.to_string()))?;
    tokio::fs::write(path, json).await?;
    tracing::debug!(path = %path.display(), "Run summary written");
    Ok(())
}
