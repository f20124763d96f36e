//! Model registration into `nnUNet_results`

use std::path::Path;

use crate::config::{DATASET_NAME, NNUNET_INSTALL_TOOL};
use crate::error::{FlamesResult, ToolError};
use crate::setup::NnUnetEnv;
use crate::tools::{CommandRunner, Invocation};

pub fn is_installed(env: &NnUnetEnv) -> bool {
    env.installed_model_dir().is_dir()
}

pub struct ModelInstaller<'a> {
    runner: &'a dyn CommandRunner,
    env: &'a NnUnetEnv,
}

impl<'a> ModelInstaller<'a> {
    pub fn new(runner: &'a dyn CommandRunner, env: &'a NnUnetEnv) -> Self {
        Self { runner, env }
    }

    /// Register the archive unless the dataset is already present.
    /// Returns whether an install actually happened.
    pub async fn ensure_installed(&self, zip_path: &Path) -> FlamesResult<bool> {
        if is_installed(self.env) {
            tracing::info!("Model {} appears to be installed.", DATASET_NAME);
            return Ok(false);
        }
        self.install(zip_path).await?;
        Ok(true)
    }

    pub async fn install(&self, zip_path: &Path) -> FlamesResult<()> {
        tracing::info!("Installing model from zip...");
        let mut inv = Invocation::new(NNUNET_INSTALL_TOOL).arg(zip_path);
        for (key, value) in self.env.vars() {
            inv = inv.env(key, value);
        }
        self.runner.run(&inv).await?.check(NNUNET_INSTALL_TOOL)?;

        if !is_installed(self.env) {
            return Err(ToolError::failed(
                NNUNET_INSTALL_TOOL,
                None,
                format!(
                    "install finished but {} was not found",
                    self.env.installed_model_dir().display()
                ),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records invocations; optionally creates the registry entry like the real tool
    struct InstallSpy {
        calls: Mutex<Vec<Invocation>>,
        creates: Option<std::path::PathBuf>,
        exit_code: i32,
    }

    #[async_trait]
    impl CommandRunner for InstallSpy {
        async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
            self.calls.lock().unwrap().push(invocation.clone());
            if let Some(dir) = &self.creates {
                std::fs::create_dir_all(dir).unwrap();
            }
            if self.exit_code == 0 {
                Ok(ToolOutput::success())
            } else {
                Ok(ToolOutput::failure(self.exit_code, "install failed"))
            }
        }
    }

    #[tokio::test]
    async fn test_skips_when_registered() {
        let dir = tempdir().unwrap();
        let env = NnUnetEnv::setup(dir.path()).unwrap();
        std::fs::create_dir_all(env.installed_model_dir()).unwrap();

        let spy = InstallSpy { calls: Mutex::new(vec![]), creates: None, exit_code: 0 };
        let installer = ModelInstaller::new(&spy, &env);
        let installed = installer.ensure_installed(&dir.path().join("model.zip")).await.unwrap();

        assert!(!installed);
        assert!(spy.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tool_install_passes_runtime_env() {
        let dir = tempdir().unwrap();
        let env = NnUnetEnv::setup(dir.path()).unwrap();
        let spy = InstallSpy {
            calls: Mutex::new(vec![]),
            creates: Some(env.installed_model_dir()),
            exit_code: 0,
        };

        let installer = ModelInstaller::new(&spy, &env);
        assert!(installer.ensure_installed(Path::new("/cache/Dataset004_WML.zip")).await.unwrap());

        let calls = spy.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program_name(), NNUNET_INSTALL_TOOL);
        assert_eq!(calls[0].arg_strings(), vec!["/cache/Dataset004_WML.zip"]);
        assert!(calls[0]
            .env
            .iter()
            .any(|(k, v)| k == "nnUNet_results" && *v == env.results));
    }

    #[tokio::test]
    async fn test_tool_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let env = NnUnetEnv::setup(dir.path()).unwrap();
        let spy = InstallSpy { calls: Mutex::new(vec![]), creates: None, exit_code: 2 };

        let installer = ModelInstaller::new(&spy, &env);
        let err = installer.ensure_installed(Path::new("/x.zip")).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
