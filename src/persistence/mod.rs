//! Persistence layer for build history and reports

pub mod report;
#[cfg(feature = "sqlite")]
pub mod store;

pub use report::{BuildReport, ReportSummary, ReportWriter};
#[cfg(feature = "sqlite")]
pub use store::SqliteHistoryStore;

use crate::core::BuildResult;
use crate::error::PipelineError;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Number of history entries kept on save
pub const MAX_HISTORY_ENTRIES: usize = 1000;

/// Trait for build history backends
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load the full history, oldest first
    async fn load(&self) -> Result<Vec<BuildResult>>;

    /// Replace the stored history, keeping the most recent [`MAX_HISTORY_ENTRIES`]
    async fn save(&self, history: &[BuildResult]) -> Result<()>;
}

/// Most recent entries that fit in the store
pub fn retained(history: &[BuildResult]) -> &[BuildResult] {
    let start = history.len().saturating_sub(MAX_HISTORY_ENTRIES);
    &history[start..]
}

/// History persisted as a single JSON document
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl HistoryStore for JsonHistoryStore {
    async fn load(&self) -> Result<Vec<BuildResult>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!("No build history at {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PipelineError::file_system(&self.path, "read", e.to_string()))?;
        let history: Vec<BuildResult> = serde_json::from_str(&content).map_err(|e| {
            PipelineError::file_system(&self.path, "parse", e.to_string())
                .with_retry_policy(false, 0, 0)
        })?;

        info!("Loaded {} history entries from {}", history.len(), self.path.display());
        Ok(history)
    }

    async fn save(&self, history: &[BuildResult]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::file_system(parent, "create_dir", e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(retained(history))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| PipelineError::file_system(&self.path, "write", e.to_string()))?;
        Ok(())
    }
}

/// In-memory history (for testing or ephemeral use)
pub struct InMemoryHistoryStore {
    history: tokio::sync::RwLock<Vec<BuildResult>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            history: tokio::sync::RwLock::new(Vec::new()),
        }
    }

    pub fn with_history(history: Vec<BuildResult>) -> Self {
        Self {
            history: tokio::sync::RwLock::new(history),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn load(&self) -> Result<Vec<BuildResult>> {
        Ok(self.history.read().await.clone())
    }

    async fn save(&self, history: &[BuildResult]) -> Result<()> {
        *self.history.write().await = retained(history).to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::GitInfo;
    use chrono::Utc;

    fn entry(n: usize) -> BuildResult {
        BuildResult::synthetic_failure(
            &format!("build-{}", n),
            "android",
            "production",
            &GitInfo::default(),
            Utc::now(),
            "failed".to_string(),
            false,
        )
    }

    #[tokio::test]
    async fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path().join("nested/history.json"));

        assert!(store.load().await.unwrap().is_empty());

        let history = vec![entry(1), entry(2)];
        store.save(&history).await.unwrap();
        assert_eq!(store.load().await.unwrap(), history);
    }

    #[tokio::test]
    async fn test_save_truncates_to_most_recent() {
        let store = InMemoryHistoryStore::new();
        let history: Vec<BuildResult> = (0..MAX_HISTORY_ENTRIES + 5).map(entry).collect();

        store.save(&history).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(loaded[0].build_id, "build-5");
        assert_eq!(
            loaded.last().unwrap().build_id,
            format!("build-{}", MAX_HISTORY_ENTRIES + 4)
        );
    }

    #[tokio::test]
    async fn test_corrupt_history_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "not json").unwrap();

        let err = JsonHistoryStore::new(&path).load().await.unwrap_err();
        let err = PipelineError::classify(err);
        assert_eq!(err.kind, crate::error::ErrorKind::FileSystem);
        assert!(!err.context.should_retry);
    }
}
