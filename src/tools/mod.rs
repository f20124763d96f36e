//! External Tool Invocation
//!
//! Every external program (SynthStrip, nnU-Net) is started through the
//! [`CommandRunner`] trait so the pipeline can be driven by a fake in tests.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use crate::error::ToolError;

/// How the child's output streams are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Collect stdout/stderr for the caller
    Capture,
    /// Stream straight to the user's terminal
    Inherit,
}

/// One fully described external process call
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(String, PathBuf)>,
    pub output: OutputMode,
}

impl Invocation {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            output: OutputMode::Inherit,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<PathBuf>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn captured(mut self) -> Self {
        self.output = OutputMode::Capture;
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Arguments as lossy strings, handy for logging and assertions
    pub fn arg_strings(&self) -> Vec<String> {
        self.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value following `flag`, if present
    pub fn arg_value(&self, flag: &str) -> Option<String> {
        let pos = self.args.iter().position(|a| a == flag)?;
        self.args.get(pos + 1).map(|v| v.to_string_lossy().into_owned())
    }
}

/// Result of a finished process
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Best available diagnostic text
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    /// Turn a non-zero exit into a [`ToolError`]
    pub fn check(self, tool: &str) -> Result<ToolOutput, ToolError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ToolError::failed(tool, self.exit_code, self.diagnostic()))
        }
    }
}

/// Starts external processes, one at a time
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. `Err` only when the process could not be started.
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;
}

/// Runner that spawns real processes
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let tool = invocation.program_name();
        tracing::debug!(tool = %tool, args = ?invocation.arg_strings(), "Tool call");

        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).stdin(Stdio::null());
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        let output = match invocation.output {
            OutputMode::Capture => {
                let out = command
                    .output()
                    .await
                    .map_err(|e| ToolError::spawn(&tool, format!("failed to start: {}", e)))?;
                ToolOutput {
                    exit_code: out.status.code(),
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                }
            }
            OutputMode::Inherit => {
                let status = command
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()
                    .await
                    .map_err(|e| ToolError::spawn(&tool, format!("failed to start: {}", e)))?;
                ToolOutput {
                    exit_code: status.code(),
                    ..Default::default()
                }
            }
        };

        tracing::debug!(
            tool = %tool,
            exit_code = ?output.exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool execution complete"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let inv = Invocation::new("nnUNetv2_predict")
            .args(["-i", "/in", "-o", "/out"])
            .arg("--disable_tta")
            .env("nnUNet_results", "/work/nnUNet_results");

        assert_eq!(inv.program_name(), "nnUNetv2_predict");
        assert_eq!(inv.arg_value("-i").as_deref(), Some("/in"));
        assert_eq!(inv.arg_value("-o").as_deref(), Some("/out"));
        assert!(inv.has_arg("--disable_tta"));
        assert!(!inv.has_arg("--gpu"));
        assert_eq!(inv.output, OutputMode::Inherit);
        assert_eq!(inv.env[0].0, "nnUNet_results");
    }

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let out = ToolOutput {
            exit_code: Some(1),
            stdout: "progress".into(),
            stderr: "Traceback: bad header\n".into(),
        };
        assert_eq!(out.diagnostic(), "Traceback: bad header");
        assert_eq!(ToolOutput::failure(2, "").diagnostic(), "exited with status 2");
    }

    #[test]
    fn test_check_maps_exit_code() {
        let err = ToolOutput::failure(7, "nope").check("nnUNetv2_predict").unwrap_err();
        assert_eq!(err.exit_code, Some(7));
        assert_eq!(err.tool_name, "nnUNetv2_predict");
        assert!(ToolOutput::success().check("x").is_ok());
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let inv = Invocation::new("flames-no-such-program-xyz").captured();
        let err = SystemRunner.run(&inv).await.unwrap_err();
        assert_eq!(err.exit_code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let inv = Invocation::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 3"])
            .captured();
        let out = SystemRunner.run(&inv).await.unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }
}
