//! Recovery and degradation dispatch tables
//!
//! Both tables match exhaustively on [`ErrorKind`], so adding a kind does not
//! compile until it has been given a recovery and a degradation entry.

use crate::error::{ErrorKind, PipelineError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Routine that changes the environment so the original operation may succeed
///
/// Kinds whose only remedy is "try again" have no routine; their retry budget
/// already covers that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Recreate the missing parent directory of the failing path
    RecreateDirectory,
    /// Release memory held by the handler before re-running
    ReleaseMemory,
}

/// Safe substitute outcome used when an operation cannot be made to succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationStrategy {
    OfflineMode,
    FallbackPath,
    SkipPlatform,
    SkipDependency,
    ReleaseMemory,
}

pub fn recovery_strategy(kind: ErrorKind) -> Option<RecoveryStrategy> {
    match kind {
        ErrorKind::FileSystem => Some(RecoveryStrategy::RecreateDirectory),
        ErrorKind::ResourceConstraint => Some(RecoveryStrategy::ReleaseMemory),
        ErrorKind::Configuration
        | ErrorKind::BuildStep
        | ErrorKind::Network
        | ErrorKind::PlatformBuild
        | ErrorKind::Dependency
        | ErrorKind::PerformanceRegression
        | ErrorKind::Timeout
        | ErrorKind::Ci => None,
    }
}

pub fn degradation_strategy(kind: ErrorKind) -> Option<DegradationStrategy> {
    match kind {
        ErrorKind::Network => Some(DegradationStrategy::OfflineMode),
        ErrorKind::FileSystem => Some(DegradationStrategy::FallbackPath),
        ErrorKind::PlatformBuild => Some(DegradationStrategy::SkipPlatform),
        ErrorKind::Dependency => Some(DegradationStrategy::SkipDependency),
        ErrorKind::ResourceConstraint => Some(DegradationStrategy::ReleaseMemory),
        ErrorKind::Configuration
        | ErrorKind::BuildStep
        | ErrorKind::PerformanceRegression
        | ErrorKind::Timeout
        | ErrorKind::Ci => None,
    }
}

/// Run the side effects of a recovery strategy.
///
/// Returns whether something changed that makes re-invoking the original
/// operation worthwhile. Memory release is handled by the caller since it
/// owns the retained state.
pub(crate) async fn run_recovery(strategy: RecoveryStrategy, error: &PipelineError) -> bool {
    match strategy {
        RecoveryStrategy::RecreateDirectory => {
            let path = match error.data_str("path") {
                Some(path) => Path::new(path),
                None => return false,
            };
            let dir = if path.extension().is_some() {
                path.parent().unwrap_or(path)
            } else {
                path
            };
            if tokio::fs::try_exists(dir).await.unwrap_or(true) {
                debug!("{} exists; nothing to recreate", dir.display());
                return false;
            }
            match tokio::fs::create_dir_all(dir).await {
                Ok(()) => {
                    info!("Recreated directory {}", dir.display());
                    true
                }
                Err(e) => {
                    debug!("Could not recreate {}: {}", dir.display(), e);
                    false
                }
            }
        }
        RecoveryStrategy::ReleaseMemory => true,
    }
}

/// Fallback location for a failed file operation
pub(crate) fn fallback_path(fallback_dir: &Path, error: &PipelineError) -> PathBuf {
    let file_name = error
        .data_str("path")
        .and_then(|p| Path::new(p).file_name())
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| error.context.id.to_string().into());
    fallback_dir.join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_cover_documented_degradations() {
        assert_eq!(degradation_strategy(ErrorKind::Network), Some(DegradationStrategy::OfflineMode));
        assert_eq!(degradation_strategy(ErrorKind::FileSystem), Some(DegradationStrategy::FallbackPath));
        assert_eq!(degradation_strategy(ErrorKind::PlatformBuild), Some(DegradationStrategy::SkipPlatform));
        assert_eq!(degradation_strategy(ErrorKind::Dependency), Some(DegradationStrategy::SkipDependency));
        assert_eq!(degradation_strategy(ErrorKind::Configuration), None);
        assert_eq!(recovery_strategy(ErrorKind::Configuration), None);
    }

    #[test]
    fn test_only_state_changing_kinds_recover() {
        let recovering: Vec<ErrorKind> = ErrorKind::ALL
            .into_iter()
            .filter(|kind| recovery_strategy(*kind).is_some())
            .collect();
        assert_eq!(recovering, vec![ErrorKind::FileSystem, ErrorKind::ResourceConstraint]);
    }

    #[test]
    fn test_fallback_path_keeps_file_name() {
        let error = PipelineError::file_system("/nope/history.json", "write", "denied");
        let path = fallback_path(Path::new("/tmp/fallback"), &error);
        assert_eq!(path, PathBuf::from("/tmp/fallback/history.json"));
    }

    #[tokio::test]
    async fn test_recreate_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/reports/report.json");
        let error = PipelineError::file_system(&target, "write", "missing dir");

        assert!(run_recovery(RecoveryStrategy::RecreateDirectory, &error).await);
        assert!(target.parent().unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_existing_directory_is_not_a_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        let error = PipelineError::file_system(&blocker, "create_dir", "not a directory");

        assert!(!run_recovery(RecoveryStrategy::RecreateDirectory, &error).await);

        let present = PipelineError::file_system(dir.path(), "write", "denied");
        assert!(!run_recovery(RecoveryStrategy::RecreateDirectory, &present).await);
    }
}
