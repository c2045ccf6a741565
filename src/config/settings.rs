use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::tools::{ExecutorConfig, ToolLanguage};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LLMConfig,
    pub search: SearchConfig,
    pub mcp: McpConfig,
    pub security: SecurityConfig,
    pub workspace: WorkspaceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Overrides the provider's default endpoint (proxies, tests).
    pub api_base: Option<String>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            api_base: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.duckduckgo.com/".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Tool creation and execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Seconds; bounds every tool run.
    pub execution_timeout: u64,
    pub language: ToolLanguage,
    pub interpreter: Option<String>,
    pub docker_image: Option<String>,
    pub docker_memory: String,
    pub docker_pids_limit: u32,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            execution_timeout: 60,
            language: ToolLanguage::Python,
            interpreter: None,
            docker_image: None,
            docker_memory: "256m".to_string(),
            docker_pids_limit: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub sandbox_enabled: bool,
    pub use_docker: bool,
    /// Advisory only. Forwarded to code generation, never enforced.
    pub allowed_imports: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            sandbox_enabled: true,
            use_docker: true,
            allowed_imports: ["json", "requests", "math", "random"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("workspace"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(
                Environment::with_prefix("TOOLSMITH")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("security.allowed_imports"),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.workspace.dir.join("tools")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.workspace.dir.join("temp_exec")
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let language = self.mcp.language;
        ExecutorConfig {
            timeout: Duration::from_secs(self.mcp.execution_timeout),
            language,
            interpreter: self
                .mcp
                .interpreter
                .clone()
                .unwrap_or_else(|| language.default_interpreter().to_string()),
            sandbox_enabled: self.security.sandbox_enabled,
            use_docker: self.security.use_docker,
            docker_image: self
                .mcp
                .docker_image
                .clone()
                .unwrap_or_else(|| language.default_image().to_string()),
            docker_memory: self.mcp.docker_memory.clone(),
            docker_pids_limit: self.mcp.docker_pids_limit,
            scratch_dir: self.scratch_dir(),
        }
    }

    /// API key for the configured provider.
    pub fn api_key(&self) -> Option<String> {
        let var = match self.llm.provider.to_lowercase().as_str() {
            "gemini" => "GEMINI_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        env::var(var).ok().filter(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default();

        assert_eq!(settings.mcp.execution_timeout, 60);
        assert_eq!(settings.mcp.language, ToolLanguage::Python);
        assert!(settings.security.sandbox_enabled);
        assert!(settings.security.use_docker);
        assert_eq!(
            settings.security.allowed_imports,
            vec!["json", "requests", "math", "random"]
        );
    }

    #[test]
    fn test_executor_config_derivation() {
        let mut settings = Settings::default();
        settings.workspace.dir = PathBuf::from("/tmp/ws");
        settings.mcp.execution_timeout = 7;
        settings.mcp.language = ToolLanguage::Shell;

        let config = settings.executor_config();
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert_eq!(config.interpreter, "sh");
        assert_eq!(config.scratch_dir, PathBuf::from("/tmp/ws/temp_exec"));
        assert_eq!(settings.tools_dir(), PathBuf::from("/tmp/ws/tools"));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(
                "[mcp]\nexecution_timeout = 5\n[security]\nuse_docker = false\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.mcp.execution_timeout, 5);
        assert!(!settings.security.use_docker);
        assert!(settings.security.sandbox_enabled);
        assert_eq!(settings.llm.provider, "openai");
    }
}
