//! nnU-Net prediction over a whole directory

use std::path::Path;

use crate::config::{Device, CONFIGURATION, DATASET_ID, NNUNET_PREDICT_TOOL, TRAINER};
use crate::error::FlamesResult;
use crate::setup::NnUnetEnv;
use crate::tools::{CommandRunner, Invocation};

/// Build the `nnUNetv2_predict` call.
///
/// CPU runs disable test-time augmentation and select the CPU explicitly.
pub fn predict_invocation(input_dir: &Path, output_dir: &Path, device: Device, env: &NnUnetEnv) -> Invocation {
    let mut inv = Invocation::new(NNUNET_PREDICT_TOOL)
        .arg("-i")
        .arg(input_dir)
        .arg("-o")
        .arg(output_dir)
        .args(["-d", DATASET_ID, "-c", CONFIGURATION, "-tr", TRAINER]);

    if device == Device::Cpu {
        inv = inv.args(["--disable_tta", "-device", "cpu"]);
    }

    for (key, value) in env.vars() {
        inv = inv.env(key, value);
    }
    inv
}

/// Run inference once; a non-zero exit aborts the run
pub async fn run_inference(
    runner: &dyn CommandRunner,
    env: &NnUnetEnv,
    input_dir: &Path,
    output_dir: &Path,
    device: Device,
) -> FlamesResult<()> {
    tokio::fs::create_dir_all(output_dir).await?;

    tracing::info!(
        device = %device,
        "Running inference on {} -> {}",
        input_dir.display(),
        output_dir.display()
    );

    let inv = predict_invocation(input_dir, output_dir, device, env);
    runner.run(&inv).await?.check(NNUNET_PREDICT_TOOL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> NnUnetEnv {
        NnUnetEnv::for_base(Path::new("/out/work_dir"))
    }

    #[test]
    fn test_gpu_invocation_keeps_tta() {
        let inv = predict_invocation(Path::new("/in"), Path::new("/seg"), Device::Cuda, &env());
        assert_eq!(
            inv.arg_strings(),
            vec!["-i", "/in", "-o", "/seg", "-d", "004", "-c", "3d_fullres", "-tr", "nnUNetTrainer_8000epochs"]
        );
        assert!(!inv.has_arg("--disable_tta"));
        assert!(!inv.has_arg("-device"));
    }

    #[test]
    fn test_cpu_invocation_disables_tta() {
        let inv = predict_invocation(Path::new("/in"), Path::new("/seg"), Device::Cpu, &env());
        assert!(inv.has_arg("--disable_tta"));
        assert_eq!(inv.arg_value("-device").as_deref(), Some("cpu"));
    }

    #[test]
    fn test_invocation_carries_runtime_paths() {
        let inv = predict_invocation(Path::new("/in"), Path::new("/seg"), Device::Cpu, &env());
        let keys: Vec<_> = inv.env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["nnUNet_raw", "nnUNet_preprocessed", "nnUNet_results"]);
    }
}
