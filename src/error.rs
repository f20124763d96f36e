//! FLAMeS Error Types
//!
//! Centralized error handling for the pipeline. Per-file skull-stripping
//! failures are not errors here; they are recorded in the strip report.

use std::fmt;

/// Main error type for pipeline operations
#[derive(Debug)]
pub enum FlamesError {
    /// Bad user input (missing input directory, nothing to process)
    Input(String),
    /// Asset download errors
    Fetch(FetchError),
    /// External tool execution errors
    Tool(ToolError),
    /// File system errors
    FileSystem(String),
    /// Configuration errors
    Config(String),
}

impl FlamesError {
    /// Process exit code for this error.
    ///
    /// Tool failures propagate the tool's own exit code when it has one.
    pub fn exit_code(&self) -> i32 {
        match self {
            FlamesError::Tool(e) => match e.exit_code {
                Some(code) if code != 0 => code,
                _ => 1,
            },
            _ => 1,
        }
    }
}

impl fmt::Display for FlamesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlamesError::Input(msg) => write!(f, "Input Error: {}", msg),
            FlamesError::Fetch(e) => write!(f, "Fetch Error: {}", e),
            FlamesError::Tool(e) => write!(f, "Tool Error: {}", e),
            FlamesError::FileSystem(msg) => write!(f, "File System Error: {}", msg),
            FlamesError::Config(msg) => write!(f, "Config Error: {}", msg),
        }
    }
}

impl std::error::Error for FlamesError {}

/// Asset download errors
#[derive(Debug)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    InvalidResponse,
    Io,
    Archive,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {} ({})", self.kind, self.message, self.url)
    }
}

impl FetchError {
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Network,
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn invalid_response(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::InvalidResponse,
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn io(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Io,
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn archive(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Archive,
            url: url.into(),
            message: message.into(),
        }
    }
}

/// External tool execution errors
#[derive(Debug)]
pub struct ToolError {
    pub tool_name: String,
    pub message: String,
    /// `None` when the process could not be spawned or was killed by a signal
    pub exit_code: Option<i32>,
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "[{}] {} (exit code {})", self.tool_name, self.message, code),
            None => write!(f, "[{}] {}", self.tool_name, self.message),
        }
    }
}

impl ToolError {
    pub fn failed(tool: impl Into<String>, exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool.into(),
            message: message.into(),
            exit_code,
        }
    }

    pub fn spawn(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool.into(),
            message: message.into(),
            exit_code: None,
        }
    }
}

impl From<FetchError> for FlamesError {
    fn from(err: FetchError) -> Self {
        FlamesError::Fetch(err)
    }
}

impl From<ToolError> for FlamesError {
    fn from(err: ToolError) -> Self {
        FlamesError::Tool(err)
    }
}

impl From<std::io::Error> for FlamesError {
    fn from(err: std::io::Error) -> Self {
        FlamesError::FileSystem(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type FlamesResult<T> = Result<T, FlamesError>;
