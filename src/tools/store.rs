//! File System Tool Store
//!
//! Information Hiding:
//! - File naming and JSON metadata format hidden from users
//! - Atomic write-then-rename mechanics hidden behind `save`
//! - Directory structure management hidden behind interface

use super::{ToolError, ToolLanguage, ToolMetadata, ToolRecord};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;

const METADATA_SUFFIX: &str = ".meta.json";

/// File system store - one source file and one metadata file per tool
/// Files are stored as {base_path}/{name}.{ext} and {base_path}/{name}.meta.json
#[derive(Debug, Clone)]
pub struct ToolStore {
    base_path: PathBuf,
    language: ToolLanguage,
}

impl ToolStore {
    pub async fn new(base_path: PathBuf, language: ToolLanguage) -> Result<Self> {
        fs::create_dir_all(&base_path)
            .await
            .context("Failed to create tools directory")?;

        Ok(Self {
            base_path,
            language,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn language(&self) -> ToolLanguage {
        self.language
    }

    pub fn source_path(&self, name: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", name, self.language.extension()))
    }

    pub fn metadata_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", name, METADATA_SUFFIX))
    }

    /// Persist source and metadata.
    ///
    /// The source lands first, so a metadata file never exists without
    /// its source. Both are renamed into place from temp files.
    pub async fn save(&self, record: &ToolRecord) -> Result<()> {
        validate_name(&record.name)?;

        let metadata = serde_json::to_string_pretty(&record.metadata())
            .context("Failed to serialize tool metadata")?;

        self.write_atomic(self.source_path(&record.name), record.source.clone())
            .await?;
        self.write_atomic(self.metadata_path(&record.name), metadata)
            .await?;

        tracing::debug!(
            "[ToolStore] Saved tool '{}' ({} bytes) to {:?}",
            record.name,
            record.source.len(),
            self.base_path
        );
        Ok(())
    }

    /// Read a tool's source. Returns `None` if the source file doesn't exist.
    pub async fn load_source(&self, name: &str) -> Result<Option<String>> {
        let path = self.source_path(name);

        if !fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!("[ToolStore] No source for '{}' at {:?}", name, path);
            return Ok(None);
        }

        let source = fs::read_to_string(&path)
            .await
            .context(format!("Failed to read tool source: {:?}", path))?;
        Ok(Some(source))
    }

    /// Read a tool's metadata. Returns `None` if the record doesn't exist.
    pub async fn load_metadata(&self, name: &str) -> Result<Option<ToolMetadata>> {
        let path = self.metadata_path(name);

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        read_metadata_file(&path).await.map(Some)
    }

    pub async fn has_metadata(&self, name: &str) -> bool {
        fs::try_exists(self.metadata_path(name))
            .await
            .unwrap_or(false)
    }

    /// All metadata files, sorted by file name so load order is stable.
    pub async fn list_metadata_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .context("Failed to read tools directory")?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let path = entry.path();
            let is_metadata = path
                .file_name()
                .and_then(|s| s.to_str())
                .map(|s| s.ends_with(METADATA_SUFFIX))
                .unwrap_or(false);
            if is_metadata {
                files.push(path);
            }
        }

        files.sort();
        tracing::debug!("[ToolStore] Listed {} metadata files", files.len());
        Ok(files)
    }

    async fn write_atomic(&self, path: PathBuf, contents: String) -> Result<()> {
        let dir = self.base_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::Builder::new()
                .prefix(".tool-")
                .suffix(".tmp")
                .tempfile_in(&dir)
                .context("Failed to create temp file in tools directory")?;
            tmp.write_all(contents.as_bytes())
                .context("Failed to write temp file")?;
            tmp.as_file()
                .sync_all()
                .context("Failed to sync temp file")?;
            tmp.persist(&path)
                .map_err(|e| e.error)
                .context(format!("Failed to move tool file into place: {:?}", path))?;
            Ok(())
        })
        .await
        .context("Tool store writer task failed")?
    }
}

pub async fn read_metadata_file(path: &Path) -> Result<ToolMetadata> {
    let json = fs::read_to_string(path)
        .await
        .context(format!("Failed to read metadata file: {:?}", path))?;

    let metadata: ToolMetadata =
        serde_json::from_str(&json).context("Failed to deserialize tool metadata")?;

    if metadata.name.trim().is_empty() {
        anyhow::bail!("Metadata file {:?} has an empty name", path);
    }
    Ok(metadata)
}

/// Tool names double as file stems.
pub fn validate_name(name: &str) -> std::result::Result<(), ToolError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(ToolError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> ToolStore {
        ToolStore::new(dir.path().join("tools"), ToolLanguage::Python)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir).await;

        let record = ToolRecord::new("EchoTool", "echoes input", "print('hi')\n");
        store.save(&record).await.unwrap();

        assert_eq!(
            store.load_source("EchoTool").await.unwrap().as_deref(),
            Some("print('hi')\n")
        );
        let metadata = store.load_metadata("EchoTool").await.unwrap().unwrap();
        assert_eq!(metadata.name, "EchoTool");
        assert_eq!(metadata.description, "echoes input");
        assert!(store.source_path("EchoTool").ends_with("EchoTool.py"));
    }

    #[tokio::test]
    async fn test_load_nonexistent_tool() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir).await;

        assert!(store.load_source("missing").await.unwrap().is_none());
        assert!(store.load_metadata("missing").await.unwrap().is_none());
        assert!(!store.has_metadata("missing").await);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_both_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir).await;

        store
            .save(&ToolRecord::new("T", "first", "v1"))
            .await
            .unwrap();
        store
            .save(&ToolRecord::new("T", "second", "v2"))
            .await
            .unwrap();

        assert_eq!(store.load_source("T").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(
            store.load_metadata("T").await.unwrap().unwrap().description,
            "second"
        );
        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(store.base_path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_list_metadata_files_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir).await;

        for name in ["zeta", "alpha", "mid"] {
            store
                .save(&ToolRecord::new(name, "d", "src"))
                .await
                .unwrap();
        }

        let files = store.list_metadata_files().await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["alpha.meta.json", "mid.meta.json", "zeta.meta.json"]
        );
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir).await;

        let err = store
            .save(&ToolRecord::new("../escape", "d", "src"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid tool name"));
        assert!(validate_name("").is_err());
        assert!(validate_name("a.b").is_err());
        assert!(validate_name("Word_Count-2").is_ok());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir).await;
        std::fs::remove_dir_all(store.base_path()).unwrap();

        let err = store
            .save(&ToolRecord::new("Lost", "d", "src"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("temp file"));
        assert!(!store.source_path("Lost").exists());
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tools");

        {
            let store = ToolStore::new(path.clone(), ToolLanguage::Shell)
                .await
                .unwrap();
            store
                .save(&ToolRecord::new("Persist", "kept", "echo '{}'"))
                .await
                .unwrap();
        }

        {
            let store = ToolStore::new(path, ToolLanguage::Shell).await.unwrap();
            assert_eq!(
                store.load_source("Persist").await.unwrap().as_deref(),
                Some("echo '{}'")
            );
        }
    }
}
