//! Task orchestration
//!
//! Turns a free-text task into a tool: reuse one whose description matches,
//! otherwise derive a name and create it, then run it with the task text.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Settings;
use crate::core::{CodeGenerator, LLMClient, NoSearch, SearchProvider, WebSearch};
use crate::tools::{Executor, ToolError, ToolLifecycle, ToolRegistry, ToolStore};

const MAX_NAME_STEM: usize = 50;

/// Outcome of one task, as reported to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    fn success(result: Option<Value>) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

pub struct Manager {
    lifecycle: Arc<ToolLifecycle>,
}

impl Manager {
    /// Wire up store, registry, executor and collaborators from settings
    pub async fn new(settings: &Settings) -> Result<Self> {
        let store = ToolStore::new(settings.tools_dir(), settings.mcp.language).await?;
        let registry = Arc::new(ToolRegistry::load(&store).await?);
        let executor = Arc::new(Executor::new(settings.executor_config()));

        let generator: Arc<dyn CodeGenerator> = Arc::new(LLMClient::from_settings(settings));
        let search: Arc<dyn SearchProvider> = if settings.search.enabled {
            Arc::new(WebSearch::from_config(&settings.search))
        } else {
            Arc::new(NoSearch)
        };

        tracing::info!(
            "Manager initialized with {} tools from {:?}",
            registry.len(),
            store.base_path()
        );

        let lifecycle = ToolLifecycle::new(registry, store, executor, generator, search)
            .with_allowed_imports(settings.security.allowed_imports.clone());

        Ok(Self::from_lifecycle(lifecycle))
    }

    pub fn from_lifecycle(lifecycle: ToolLifecycle) -> Self {
        Self {
            lifecycle: Arc::new(lifecycle),
        }
    }

    pub fn lifecycle(&self) -> &ToolLifecycle {
        &self.lifecycle
    }

    /// Resolve or create a tool for `query` and run it with `{"task_query": query}`
    pub async fn process_task(&self, query: &str) -> TaskOutcome {
        tracing::info!("Received task: '{}'", query);

        match self.try_process(query).await {
            Ok(result) => {
                tracing::info!("Task processed successfully");
                TaskOutcome::success(result)
            }
            Err(e) => {
                tracing::error!("Task processing failed: {}", e);
                TaskOutcome::failure(e.to_string())
            }
        }
    }

    async fn try_process(&self, query: &str) -> Result<Option<Value>, ToolError> {
        let tool_name = match self.lifecycle.resolve_by_description(query) {
            Some(existing) => {
                tracing::info!("Found existing tool by description: '{}'", existing);
                existing
            }
            None => {
                let name = tool_name_from_query(query);
                let description = format!("A tool that can: {}", query);
                self.lifecycle
                    .ensure_tool(&name, &description)
                    .await?
                    .name()
                    .to_string()
            }
        };

        let outcome = self
            .lifecycle
            .execute(&tool_name, &json!({ "task_query": query }))
            .await?;

        if !outcome.success {
            return Err(ToolError::Execution {
                name: tool_name,
                reason: outcome.error.unwrap_or_default(),
            });
        }

        Ok(outcome.result)
    }
}

/// Deterministic tool name: title-cased alphanumeric words, capped, plus `Tool`
pub fn tool_name_from_query(query: &str) -> String {
    let mut stem = String::new();
    let mut prev_alpha = false;

    for c in query.chars().filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace()) {
        if c.is_whitespace() {
            prev_alpha = false;
            continue;
        }
        if c.is_ascii_alphabetic() {
            if prev_alpha {
                stem.push(c.to_ascii_lowercase());
            } else {
                stem.push(c.to_ascii_uppercase());
            }
            prev_alpha = true;
        } else {
            stem.push(c);
            prev_alpha = false;
        }
    }

    stem.truncate(MAX_NAME_STEM);
    format!("{}Tool", stem)
}

pub mod batch {
    use super::*;
    use futures::stream::{self, StreamExt};

    /// Process tasks with bounded concurrency; outcomes keep input order
    pub async fn process_tasks(
        manager: &Manager,
        tasks: Vec<String>,
        concurrency: usize,
    ) -> Vec<TaskOutcome> {
        stream::iter(tasks)
            .map(|task| async move { manager.process_task(&task).await })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}
