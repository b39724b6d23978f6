//! Build cache warming

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub size: u64,
    pub hit_rate: f64,
}

#[async_trait]
pub trait CacheService: Send + Sync {
    async fn warm_cache(&self) -> anyhow::Result<()>;

    fn stats(&self) -> CacheStats;
}

/// Cache backed by a directory of cached artifacts
///
/// Warming indexes the directory. The hit rate is the share of entries that
/// were already present at the previous warm.
pub struct DirectoryCache {
    root: PathBuf,
    state: Mutex<DirectoryCacheState>,
}

#[derive(Default)]
struct DirectoryCacheState {
    known: HashSet<PathBuf>,
    stats: CacheStats,
}

impl DirectoryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(DirectoryCacheState::default()),
        }
    }
}

#[async_trait]
impl CacheService for DirectoryCache {
    async fn warm_cache(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut seen = HashSet::new();
        let mut size = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                size += metadata.len();
                seen.insert(entry.path());
            }
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let hits = seen.intersection(&state.known).count();
        state.stats = CacheStats {
            entries: seen.len() as u64,
            size,
            hit_rate: if seen.is_empty() {
                0.0
            } else {
                hits as f64 / seen.len() as f64
            },
        };
        state.known = seen;
        debug!(
            "Warmed cache {}: {} entries, {} bytes",
            self.root.display(),
            state.stats.entries,
            state.stats.size
        );
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_warm_counts_entries_and_hits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"1234").unwrap();
        let cache = DirectoryCache::new(dir.path());

        cache.warm_cache().await.unwrap();
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.stats().size, 4);
        assert_eq!(cache.stats().hit_rate, 0.0);

        std::fs::write(dir.path().join("b.bin"), b"56").unwrap();
        cache.warm_cache().await.unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.size, 6);
        assert_eq!(stats.hit_rate, 0.5);
    }
}
