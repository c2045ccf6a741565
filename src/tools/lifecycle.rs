//! Tool Lifecycle Controller
//!
//! Information Hiding:
//! - Reuse vs. create decision hidden
//! - Context gathering and code generation pipeline hidden
//! - Validation gating and persistence ordering hidden
//! - Per-name creation locking hidden

use super::error::{Result, ToolError};
use super::store::validate_name;
use super::{ExecutionResult, Executor, ToolRecord, ToolRegistry, ToolStore};
use crate::core::llm::{extract_code_block, CodeGenerator};
use crate::core::prompts::{ToolPrompt, NO_CONTEXT};
use crate::core::search::{search_or_empty, SearchProvider};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// How a tool request was satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// An existing tool matched; nothing was generated
    Found(String),
    /// A new tool was generated, validated and persisted
    Created(String),
}

impl Acquisition {
    pub fn name(&self) -> &str {
        match self {
            Acquisition::Found(name) | Acquisition::Created(name) => name,
        }
    }
}

/// Decides whether to reuse, create, or reject a tool, and runs tools by name
pub struct ToolLifecycle {
    registry: Arc<ToolRegistry>,
    store: ToolStore,
    executor: Arc<Executor>,
    generator: Arc<dyn CodeGenerator>,
    search: Arc<dyn SearchProvider>,
    allowed_imports: Vec<String>,
    creation_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ToolLifecycle {
    pub fn new(
        registry: Arc<ToolRegistry>,
        store: ToolStore,
        executor: Arc<Executor>,
        generator: Arc<dyn CodeGenerator>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            registry,
            store,
            executor,
            generator,
            search,
            allowed_imports: Vec::new(),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Advisory list forwarded to code generation; never enforced
    pub fn with_allowed_imports(mut self, imports: Vec<String>) -> Self {
        self.allowed_imports = imports;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &ToolStore {
        &self.store
    }

    /// Fuzzy lookup over registered descriptions
    pub fn resolve_by_description(&self, description: &str) -> Option<String> {
        self.registry.find_by_description(description)
    }

    /// Exact lookup by name
    pub fn resolve_by_name(&self, name: &str) -> bool {
        self.registry.exists(name)
    }

    /// Reuse a tool with this exact name, or create it
    pub async fn ensure_tool(&self, name: &str, description: &str) -> Result<Acquisition> {
        if self.resolve_by_name(name) {
            tracing::info!("Found existing tool: '{}'", name);
            return Ok(Acquisition::Found(name.to_string()));
        }

        self.create_tool(name, description).await
    }

    /// Reuse a tool whose description matches, else ensure `name_hint`
    pub async fn ensure_tool_for(&self, description: &str, name_hint: &str) -> Result<Acquisition> {
        if let Some(existing) = self.resolve_by_description(description) {
            tracing::info!("Found existing tool by description: '{}'", existing);
            return Ok(Acquisition::Found(existing));
        }

        self.ensure_tool(name_hint, description).await
    }

    /// Generate, validate and persist a new tool
    ///
    /// Concurrent creations of the same name are serialised; a caller that
    /// waited on the lock gets `Found` once the first creation registered.
    pub async fn create_tool(&self, name: &str, description: &str) -> Result<Acquisition> {
        validate_name(name)?;

        let slot = self.creation_slot(name);
        let _guard = slot.lock.lock().await;

        if self.registry.exists(name) {
            tracing::info!("Tool '{}' was created while waiting, reusing it", name);
            return Ok(Acquisition::Found(name.to_string()));
        }

        tracing::info!("Initiating creation for tool: '{}'", name);

        let context = self.gather_context(description).await;
        let prompt = ToolPrompt {
            tool_name: name,
            task_description: description,
            search_context: &context,
            language: self.store.language(),
            allowed_imports: &self.allowed_imports,
        }
        .render();

        let response = self
            .generator
            .generate(&prompt)
            .await
            .map_err(|e| ToolError::creation(name, e.to_string()))?;
        let source = extract_code_block(&response);

        if !self.executor.validate(&source).await {
            tracing::warn!("Generated code for '{}' failed syntax validation", name);
            return Err(ToolError::creation(
                name,
                "generated code failed syntax validation",
            ));
        }

        let record = ToolRecord::new(name, description, source);
        self.store
            .save(&record)
            .await
            .map_err(|e| ToolError::creation(name, format!("{:#}", e)))?;
        self.registry.register(name, description);

        tracing::info!("Tool '{}' created and saved successfully", name);
        Ok(Acquisition::Created(name.to_string()))
    }

    /// Run a stored tool with the executor's configured timeout
    ///
    /// Reads the source straight from the store. Executor failures come
    /// back unchanged inside the `ExecutionResult`.
    pub async fn execute(&self, name: &str, parameters: &Value) -> Result<ExecutionResult> {
        validate_name(name).map_err(|_| ToolError::NotFound(name.to_string()))?;

        let source = match self.store.load_source(name).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                if self.store.has_metadata(name).await {
                    return Err(ToolError::Inconsistent {
                        name: name.to_string(),
                        reason: "metadata exists but the source file is missing".to_string(),
                    });
                }
                return Err(ToolError::NotFound(name.to_string()));
            }
            Err(e) => {
                return Err(ToolError::Inconsistent {
                    name: name.to_string(),
                    reason: format!("{:#}", e),
                })
            }
        };

        tracing::info!("Executing tool '{}'", name);
        Ok(self.executor.execute(&source, parameters).await)
    }

    async fn gather_context(&self, description: &str) -> String {
        let query = format!(
            "Simple {} script for '{}'",
            self.store.language().name(),
            description
        );

        match search_or_empty(self.search.as_ref(), &query).await.first() {
            Some(hit) => {
                serde_json::to_string_pretty(hit).unwrap_or_else(|_| NO_CONTEXT.to_string())
            }
            None => {
                tracing::debug!("No search context for '{}'", description);
                NO_CONTEXT.to_string()
            }
        }
    }

    fn creation_slot(&self, name: &str) -> CreationSlot<'_> {
        let mut locks = self
            .creation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(name.to_string()).or_default().clone();
        CreationSlot {
            locks: &self.creation_locks,
            name: name.to_string(),
            lock,
        }
    }
}

/// Handle on a per-name creation lock; the map entry goes away with the
/// last handle, including when the creating future is dropped.
struct CreationSlot<'a> {
    locks: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    name: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.name);
        }
    }
}
