//! Skull stripping with SynthStrip
//!
//! One tool invocation per volume, every run. A failing volume is recorded in
//! the report, whatever it left at its output path is removed, and the batch
//! moves on.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::Device;
use crate::setup::assets::SynthStripAssets;
use crate::tools::{CommandRunner, Invocation};

const PRIMARY_EXT: &str = ".nii.gz";
const FALLBACK_EXT: &str = ".nii";

/// Prefix added to every stripped output file
pub const STRIPPED_PREFIX: &str = "stripped_";

fn files_with_suffix(dir: &Path, suffix: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(suffix) && n.len() > suffix.len())
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Input volumes in `dir`: every `*.nii.gz`, or if there are none, every `*.nii`.
/// The two conventions are never mixed.
pub fn discover_volumes(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let files = files_with_suffix(dir, PRIMARY_EXT)?;
    if !files.is_empty() {
        return Ok(files);
    }
    files_with_suffix(dir, FALLBACK_EXT)
}

/// Output file name for a source volume
pub fn stripped_name(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}{}", STRIPPED_PREFIX, name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StripStatus {
    Stripped,
    Failed { diagnostic: String },
}

/// Result for one input volume
#[derive(Debug, Clone, Serialize)]
pub struct StripOutcome {
    pub source: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub status: StripStatus,
}

impl StripOutcome {
    pub fn is_usable(&self) -> bool {
        !matches!(self.status, StripStatus::Failed { .. })
    }
}

/// Per-file outcomes of one batch, in processing order
#[derive(Debug, Clone, Default, Serialize)]
pub struct StripReport {
    pub outcomes: Vec<StripOutcome>,
}

impl StripReport {
    pub fn usable_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_usable()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &StripOutcome> {
        self.outcomes.iter().filter(|o| !o.is_usable())
    }
}

/// Runs SynthStrip over a directory of volumes
pub struct SkullStripper<'a> {
    runner: &'a dyn CommandRunner,
    python: &'a str,
    assets: &'a SynthStripAssets,
}

impl<'a> SkullStripper<'a> {
    pub fn new(runner: &'a dyn CommandRunner, python: &'a str, assets: &'a SynthStripAssets) -> Self {
        Self { runner, python, assets }
    }

    fn invocation(&self, source: &Path, output: &Path, device: Device) -> Invocation {
        let mut inv = Invocation::new(self.python)
            .arg(&self.assets.script)
            .arg("-i")
            .arg(source)
            .arg("-o")
            .arg(output)
            .arg("--model")
            .arg(&self.assets.weights)
            .arg("--no-csf")
            .captured();
        if device.is_accelerated() {
            inv = inv.arg("--gpu");
        }
        inv
    }

    /// Strip every volume found in `input_dir` into `output_dir`
    pub async fn run_batch(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        device: Device,
    ) -> std::io::Result<StripReport> {
        tokio::fs::create_dir_all(output_dir).await?;
        let volumes = discover_volumes(input_dir)?;

        tracing::info!(
            "Processing {} files for Skull Stripping from '{}'...",
            volumes.len(),
            input_dir.display()
        );

        let mut report = StripReport::default();
        for source in volumes {
            let outcome = self.strip_one(&source, output_dir, device).await;
            report.outcomes.push(outcome);
        }

        tracing::info!(
            total = report.outcomes.len(),
            usable = report.usable_count(),
            "Skull stripping finished"
        );
        Ok(report)
    }

    async fn strip_one(&self, source: &Path, output_dir: &Path, device: Device) -> StripOutcome {
        let filename = source.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let output = output_dir.join(stripped_name(source));

        tracing::info!("Skull stripping {}...", filename);
        let inv = self.invocation(source, &output, device);

        let status = match self.runner.run(&inv).await {
            Ok(out) if out.is_success() => {
                tracing::info!("Saved at {}", output.display());
                StripStatus::Stripped
            }
            Ok(out) => {
                let diagnostic = out.diagnostic();
                tracing::error!("Error on {}: {}", filename, diagnostic);
                StripStatus::Failed { diagnostic }
            }
            Err(e) => {
                tracing::error!("Error on {}: {}", filename, e);
                StripStatus::Failed { diagnostic: e.to_string() }
            }
        };

        // A killed or failing run can leave a partial volume behind
        if matches!(status, StripStatus::Failed { .. }) {
            discard_output(&output).await;
        }

        StripOutcome {
            source: source.to_path_buf(),
            output,
            status,
        }
    }
}

async fn discard_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => tracing::debug!(path = %output.display(), "Removed incomplete output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %output.display(), error = %e, "Could not remove incomplete output"),
    }
}
