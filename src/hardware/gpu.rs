//! GPU Detection
//!
//! Detects accelerator availability using multiple methods:
//! 1. Ask the Python runtime the external tools run on (`torch.cuda`)
//! 2. NVIDIA: check that `nvidia-smi` can list a device
//! 3. Fallback to CPU if neither reports a GPU

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Anything that can answer "is an accelerator usable right now"
#[async_trait]
pub trait GpuDetector: Send + Sync {
    async fn accelerator_available(&self) -> bool;
}

/// Detector backed by the real machine
pub struct SystemGpuDetector {
    python: String,
}

impl SystemGpuDetector {
    pub fn new(python: impl Into<String>) -> Self {
        Self { python: python.into() }
    }
}

#[async_trait]
impl GpuDetector for SystemGpuDetector {
    async fn accelerator_available(&self) -> bool {
        if detect_gpu(&self.python).await {
            tracing::info!("GPU is available.");
            true
        } else {
            tracing::warn!("GPU not available. Running on CPU might be slow.");
            false
        }
    }
}

/// Main GPU detection function
pub async fn detect_gpu(python: &str) -> bool {
    // The tools run under torch, so its answer wins when it can give one
    match detect_via_torch(python).await {
        Some(available) => {
            tracing::debug!(available, "torch CUDA query");
            available
        }
        None => {
            tracing::debug!(python, "torch query unavailable, trying nvidia-smi");
            detect_nvidia().await
        }
    }
}

/// Ask torch through the configured interpreter.
/// Returns `None` if the interpreter or torch itself is missing.
async fn detect_via_torch(python: &str) -> Option<bool> {
    let output = Command::new(python)
        .args([
            "-c",
            "import torch; print('yes' if torch.cuda.is_available() else 'no')",
        ])
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    parse_torch_answer(&String::from_utf8_lossy(&output.stdout))
}

fn parse_torch_answer(stdout: &str) -> Option<bool> {
    match stdout.lines().last()?.trim() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

/// `nvidia-smi -L` lists one `GPU n: ...` line per device
async fn detect_nvidia() -> bool {
    match Command::new("nvidia-smi").arg("-L").stdin(Stdio::null()).output().await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).lines().any(|l| l.starts_with("GPU "))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_torch_answer_uses_last_line() {
        assert_eq!(parse_torch_answer("some warning\nyes\n"), Some(true));
        assert_eq!(parse_torch_answer("no"), Some(false));
        assert_eq!(parse_torch_answer("maybe"), None);
        assert_eq!(parse_torch_answer(""), None);
    }

    #[tokio::test]
    async fn test_missing_interpreter_gives_no_answer() {
        assert_eq!(detect_via_torch("definitely-not-a-python-interpreter").await, None);
    }
}
