//! Tool Registry
//!
//! Information Hiding:
//! - Index storage and ordering hidden
//! - Similarity scoring algorithm hidden behind `find_by_description`
//! - Loading from the store abstracted

use super::store::{read_metadata_file, ToolStore};
use super::ToolMetadata;
use anyhow::Result;
use std::sync::{PoisonError, RwLock};

/// Minimum similarity a description must exceed to count as a match
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// In-memory index of known tools
///
/// Entries keep insertion order, so similarity ties resolve to the
/// earliest-registered tool.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<Vec<ToolMetadata>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from every metadata record in the store
    ///
    /// Malformed records are logged and skipped.
    pub async fn load(store: &ToolStore) -> Result<Self> {
        let registry = Self::new();

        for path in store.list_metadata_files().await? {
            match read_metadata_file(&path).await {
                Ok(metadata) => registry.register(metadata.name, metadata.description),
                Err(e) => {
                    tracing::warn!("Failed to load tool metadata {:?}: {:#}", path, e);
                }
            }
        }

        tracing::info!("Loaded {} tools from {:?}", registry.len(), store.base_path());
        Ok(registry)
    }

    /// Register a tool, overwriting any existing entry with the same name
    pub fn register(&self, name: impl Into<String>, description: impl Into<String>) {
        let name = name.into();
        let description = description.into();
        tracing::info!("Registering tool: {}", name);

        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        match tools.iter_mut().find(|t| t.name == name) {
            Some(existing) => existing.description = description,
            None => tools.push(ToolMetadata { name, description }),
        }
    }

    /// Check if a tool exists
    pub fn exists(&self, name: &str) -> bool {
        self.read().iter().any(|t| t.name == name)
    }

    pub fn description(&self, name: &str) -> Option<String> {
        self.read()
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.description.clone())
    }

    /// Name of the tool whose description best matches `query`
    ///
    /// Returns `None` when the registry is empty or no score exceeds
    /// [`SIMILARITY_THRESHOLD`].
    pub fn find_by_description(&self, query: &str) -> Option<String> {
        let tools = self.read();

        let mut best: Option<(&ToolMetadata, f64)> = None;
        for tool in tools.iter() {
            let score = similarity(&tool.description, query);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((tool, score));
            }
        }

        match best {
            Some((tool, score)) if score > SIMILARITY_THRESHOLD => {
                tracing::debug!("Matched '{}' with score {:.3}", tool.name, score);
                Some(tool.name.clone())
            }
            Some((tool, score)) => {
                tracing::debug!(
                    "Best candidate '{}' scored {:.3}, below threshold",
                    tool.name,
                    score
                );
                None
            }
            None => None,
        }
    }

    /// Get all tool metadata in index order
    pub fn list(&self) -> Vec<ToolMetadata> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ToolMetadata>> {
        self.tools.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Normalized edit similarity in [0, 1]; symmetric in its arguments
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolLanguage, ToolRecord};
    use tempfile::TempDir;

    #[test]
    fn test_registry_register_and_exists() {
        let registry = ToolRegistry::new();
        registry.register("EchoTool", "echoes input");

        assert!(registry.exists("EchoTool"));
        assert!(!registry.exists("echotool"));
        assert_eq!(registry.description("EchoTool").as_deref(), Some("echoes input"));
    }

    #[test]
    fn test_register_overwrites_in_place() {
        let registry = ToolRegistry::new();
        registry.register("A", "first");
        registry.register("B", "second");
        registry.register("A", "replaced");

        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(registry.description("A").as_deref(), Some("replaced"));
    }

    #[test]
    fn test_find_exact_description() {
        let registry = ToolRegistry::new();
        registry.register("EchoTool", "echoes input");
        registry.register("WeatherTool", "fetches the current weather for a city");

        assert_eq!(
            registry.find_by_description("echoes input").as_deref(),
            Some("EchoTool")
        );
        assert_eq!(
            registry
                .find_by_description("fetches the current weather for a town")
                .as_deref(),
            Some("WeatherTool")
        );
    }

    #[test]
    fn test_find_below_threshold_returns_none() {
        let registry = ToolRegistry::new();
        registry.register("EchoTool", "echoes input");

        assert!(registry
            .find_by_description("compute the prime factorisation of a large integer")
            .is_none());
        assert!(ToolRegistry::new().find_by_description("anything").is_none());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // "abcdefghij" vs "abcdefgxyz": 3 edits over 10 chars = 0.7
        // "abcdefghij" vs "abcdwxyzij": 4 edits over 10 chars = 0.6
        assert!((similarity("abcdefghij", "abcdwxyzij") - 0.6).abs() < 1e-9);

        let registry = ToolRegistry::new();
        registry.register("Exact60", "abcdefghij");
        assert!(registry.find_by_description("abcdwxyzij").is_none());
        assert_eq!(
            registry.find_by_description("abcdefgxyz").as_deref(),
            Some("Exact60")
        );
    }

    #[test]
    fn test_ties_resolve_to_first_registered() {
        let registry = ToolRegistry::new();
        registry.register("First", "sum two numbers");
        registry.register("Second", "sum two numbers");

        assert_eq!(
            registry.find_by_description("sum two numbers").as_deref(),
            Some("First")
        );
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = "convert celsius to fahrenheit";
        let b = "convert fahrenheit to celsius";
        assert_eq!(similarity(a, b), similarity(b, a));
        assert_eq!(similarity(a, a), 1.0);
    }

    #[tokio::test]
    async fn test_load_skips_malformed_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = ToolStore::new(temp_dir.path().to_path_buf(), ToolLanguage::Python)
            .await
            .unwrap();

        store
            .save(&ToolRecord::new("Good", "a good tool", "print(1)"))
            .await
            .unwrap();
        std::fs::write(temp_dir.path().join("Bad.meta.json"), "{not json").unwrap();
        std::fs::write(
            temp_dir.path().join("Nameless.meta.json"),
            r#"{"name": "", "description": "x"}"#,
        )
        .unwrap();

        let registry = ToolRegistry::load(&store).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.exists("Good"));
    }
}
