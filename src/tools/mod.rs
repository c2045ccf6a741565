//! Tool System - Generated tools, their persistence and sandboxed execution
//!
//! Information Hiding:
//! - On-disk layout hidden behind the store
//! - Similarity scoring hidden behind the registry
//! - Process and container management hidden behind the executor
//! - Reuse/create/reject decisions hidden behind the lifecycle controller

pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod registry;
pub mod store;

pub use error::ToolError;
pub use executor::Executor;
pub use lifecycle::{Acquisition, ToolLifecycle};
pub use registry::ToolRegistry;
pub use store::ToolStore;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Tool metadata - the persisted description of a generated tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
}

impl fmt::Display for ToolMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.description)
    }
}

/// A complete tool: metadata plus the program source implementing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRecord {
    pub name: String,
    pub description: String,
    pub source: String,
}

impl ToolRecord {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source: source.into(),
        }
    }

    pub fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Result of running a tool
///
/// `result` is meaningful when `success` is true, `error` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Language generated tools are written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolLanguage {
    #[default]
    Python,
    Shell,
}

impl ToolLanguage {
    pub fn name(&self) -> &'static str {
        match self {
            ToolLanguage::Python => "Python",
            ToolLanguage::Shell => "POSIX shell",
        }
    }

    /// Extension of source artifacts in the tool store and scratch dirs
    pub fn extension(&self) -> &'static str {
        match self {
            ToolLanguage::Python => "py",
            ToolLanguage::Shell => "sh",
        }
    }

    pub fn default_interpreter(&self) -> &'static str {
        match self {
            ToolLanguage::Python => "python3",
            ToolLanguage::Shell => "sh",
        }
    }

    /// Interpreter as named inside the container image
    pub fn container_interpreter(&self) -> &'static str {
        match self {
            ToolLanguage::Python => "python",
            ToolLanguage::Shell => "sh",
        }
    }

    pub fn default_image(&self) -> &'static str {
        match self {
            ToolLanguage::Python => "python:3.10-slim",
            ToolLanguage::Shell => "alpine:3",
        }
    }

    /// Interpreter arguments that parse `file` without running it
    pub fn syntax_check_args(&self, file: &str) -> Vec<String> {
        match self {
            ToolLanguage::Python => vec![
                "-c".to_string(),
                "import sys; compile(open(sys.argv[1]).read(), sys.argv[1], 'exec')".to_string(),
                file.to_string(),
            ],
            ToolLanguage::Shell => vec!["-n".to_string(), file.to_string()],
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub timeout: Duration,
    pub language: ToolLanguage,
    pub interpreter: String,
    pub sandbox_enabled: bool,
    pub use_docker: bool,
    pub docker_image: String,
    pub docker_memory: String,
    pub docker_pids_limit: u32,
    /// Parent of the per-execution scratch directories
    pub scratch_dir: PathBuf,
}

impl ExecutorConfig {
    /// Plain-subprocess configuration for `language`, scratch files under the system temp dir
    pub fn local(language: ToolLanguage) -> Self {
        Self {
            timeout: Duration::from_secs(60),
            language,
            interpreter: language.default_interpreter().to_string(),
            sandbox_enabled: true,
            use_docker: false,
            docker_image: language.default_image().to_string(),
            docker_memory: "256m".to_string(),
            docker_pids_limit: 64,
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Whether container isolation should be attempted at all
    pub fn wants_container(&self) -> bool {
        self.sandbox_enabled && self.use_docker
    }
}
