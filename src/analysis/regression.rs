//! Regression detection over build history

use crate::core::config::{RegressionConfig, SeverityCutoffs};
use crate::core::BuildResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Number of regressions returned by [`RegressionAnalyzer::recent`]
pub const RECENT_REGRESSIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionMetric {
    BundleSize,
    BuildTime,
    MemoryUsage,
}

impl RegressionMetric {
    pub fn name(&self) -> &'static str {
        match self {
            RegressionMetric::BundleSize => "bundle_size",
            RegressionMetric::BuildTime => "build_time",
            RegressionMetric::MemoryUsage => "memory_usage",
        }
    }

    fn recommendations(&self) -> Vec<String> {
        let fixed: &[&str] = match self {
            RegressionMetric::BundleSize => &[
                "Enable tree shaking to remove unused code",
                "Check for newly added large dependencies",
                "Compress or lazy-load large assets",
            ],
            RegressionMetric::BuildTime => &[
                "Warm the build cache before bundling",
                "Check for newly added build-time transforms",
                "Reduce the number of files processed by the bundler",
            ],
            RegressionMetric::MemoryUsage => &[
                "Check for large in-memory assets processed at build time",
                "Reduce bundler worker concurrency",
            ],
        };
        fixed.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for RegressionMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegressionSeverity {
    Minor,
    Major,
}

/// One metric of one build that got worse than its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRegression {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub build_id: String,
    pub platform: String,
    pub environment: String,
    pub metric: RegressionMetric,
    /// Mean of the earlier builds
    pub baseline: f64,
    pub current: f64,
    /// Percentage over the baseline
    pub regression: f64,
    pub severity: RegressionSeverity,
    pub recommendations: Vec<String>,
}

/// Compares each combination's latest build against the mean of its
/// earlier builds and keeps every regression it finds for the lifetime of
/// the process.
#[derive(Debug)]
pub struct RegressionAnalyzer {
    config: RegressionConfig,
    regressions: Vec<PerformanceRegression>,
}

impl RegressionAnalyzer {
    pub fn new(config: RegressionConfig) -> Self {
        Self {
            config,
            regressions: Vec::new(),
        }
    }

    pub fn config(&self) -> &RegressionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RegressionConfig) {
        self.config = config;
    }

    /// Analyze the last `window` entries of `history`.
    ///
    /// Returns the regressions found by this call; they are also appended to
    /// the analyzer's list.
    pub fn analyze(&mut self, history: &[BuildResult], window: usize) -> Vec<PerformanceRegression> {
        let start = history.len().saturating_sub(window);
        let mut groups: BTreeMap<(&str, &str), Vec<&BuildResult>> = BTreeMap::new();
        for result in history[start..].iter().filter(|r| r.success) {
            groups.entry(result.combination_key()).or_default().push(result);
        }

        let mut found = Vec::new();
        for ((platform, environment), builds) in groups {
            let (latest, earlier) = match builds.split_last() {
                Some((latest, earlier)) if !earlier.is_empty() => (*latest, earlier),
                _ => {
                    debug!("Skipping {}/{}: not enough history", platform, environment);
                    continue;
                }
            };

            let checks = [
                (
                    RegressionMetric::BundleSize,
                    Some(latest.bundle_size as f64),
                    mean(earlier.iter().map(|r| Some(r.bundle_size as f64))),
                    self.config.threshold_bundle_size,
                    self.config.bundle_size_cutoffs,
                ),
                (
                    RegressionMetric::BuildTime,
                    Some(latest.duration_ms as f64),
                    mean(earlier.iter().map(|r| Some(r.duration_ms as f64))),
                    self.config.threshold_build_time,
                    self.config.build_time_cutoffs,
                ),
                (
                    RegressionMetric::MemoryUsage,
                    latest.memory_usage(),
                    mean(earlier.iter().map(|r| r.memory_usage())),
                    self.config.threshold_memory_usage,
                    self.config.memory_usage_cutoffs,
                ),
            ];

            for (metric, current, baseline, threshold, cutoffs) in checks {
                let (current, baseline) = match (current, baseline) {
                    (Some(c), Some(b)) if b > 0.0 => (c, b),
                    _ => continue,
                };
                let percent = (current - baseline) / baseline * 100.0;
                if let Some(severity) = classify(percent, threshold, cutoffs) {
                    warn!(
                        "{} regression in {}/{}: {:.1}% over baseline ({:.0} -> {:.0})",
                        metric, platform, environment, percent, baseline, current
                    );
                    found.push(PerformanceRegression {
                        id: Uuid::new_v4(),
                        timestamp: Utc::now(),
                        build_id: latest.build_id.clone(),
                        platform: latest.platform.clone(),
                        environment: latest.environment.clone(),
                        metric,
                        baseline,
                        current,
                        regression: percent,
                        severity,
                        recommendations: metric.recommendations(),
                    });
                }
            }
        }

        self.regressions.extend(found.iter().cloned());
        found
    }

    /// Every regression found since the analyzer was created
    pub fn regressions(&self) -> &[PerformanceRegression] {
        &self.regressions
    }

    /// The most recent regressions, oldest first
    pub fn recent(&self, count: usize) -> &[PerformanceRegression] {
        let start = self.regressions.len().saturating_sub(count);
        &self.regressions[start..]
    }
}

fn classify(percent: f64, threshold: f64, cutoffs: SeverityCutoffs) -> Option<RegressionSeverity> {
    if percent > threshold * cutoffs.major {
        Some(RegressionSeverity::Major)
    } else if percent > threshold * cutoffs.minor {
        Some(RegressionSeverity::Minor)
    } else {
        None
    }
}

/// Mean of the present values; `None` if there are none
fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::GitInfo;
    use crate::core::state::MEMORY_USAGE_METRIC;

    fn build(platform: &str, environment: &str, bundle_size: u64, duration_ms: u64) -> BuildResult {
        let mut result = BuildResult::synthetic_failure(
            "build-test",
            platform,
            environment,
            &GitInfo::default(),
            Utc::now(),
            String::new(),
            false,
        );
        result.success = true;
        result.errors.clear();
        result.bundle_size = bundle_size;
        result.duration_ms = duration_ms;
        result
    }

    #[test]
    fn test_twenty_percent_bundle_growth() {
        let mut history: Vec<BuildResult> =
            (0..5).map(|_| build("android", "production", 1_000_000, 1000)).collect();
        history.push(build("android", "production", 1_200_000, 1000));

        let mut analyzer = RegressionAnalyzer::new(RegressionConfig::default());
        let found = analyzer.analyze(&history, 10);

        assert_eq!(found.len(), 1);
        let regression = &found[0];
        assert_eq!(regression.metric, RegressionMetric::BundleSize);
        assert!((regression.regression - 20.0).abs() < 1e-9);
        assert_eq!(regression.baseline, 1_000_000.0);
        // 20% is above 10 × 1.0 and not above 10 × 2.0
        assert_eq!(regression.severity, RegressionSeverity::Minor);
        assert!(regression.recommendations[0].contains("tree shaking"));
        assert_eq!(analyzer.regressions().len(), 1);
    }

    #[test]
    fn test_major_cutoff_is_configurable() {
        let mut config = RegressionConfig::default();
        config.bundle_size_cutoffs.major = 1.5;
        let mut history: Vec<BuildResult> =
            (0..5).map(|_| build("android", "production", 1_000_000, 1000)).collect();
        history.push(build("android", "production", 1_200_000, 1000));

        let found = RegressionAnalyzer::new(config).analyze(&history, 10);
        assert_eq!(found[0].severity, RegressionSeverity::Major);
    }

    #[test]
    fn test_single_entry_groups_are_skipped() {
        let history = vec![
            build("android", "production", 1_000_000, 1000),
            build("ios", "production", 5_000_000, 9000),
        ];
        let found = RegressionAnalyzer::new(RegressionConfig::default()).analyze(&history, 10);
        assert!(found.is_empty());
    }

    #[test]
    fn test_hyphenated_names_stay_separate() {
        let history = vec![
            build("android-tv", "production", 100_000, 1000),
            build("android", "tv-production", 1_000_000, 1000),
        ];
        let found = RegressionAnalyzer::new(RegressionConfig::default()).analyze(&history, 10);
        assert!(found.is_empty());
    }

    #[test]
    fn test_window_and_failed_builds() {
        let mut failed = build("android", "production", 0, 10);
        failed.success = false;
        let history = vec![
            build("android", "production", 100, 1000),
            build("android", "production", 1_000_000, 1000),
            failed,
            build("android", "production", 1_050_000, 1000),
        ];

        // The window drops the first (tiny) build; the failed one is ignored
        let found = RegressionAnalyzer::new(RegressionConfig::default()).analyze(&history, 3);
        assert!(found.is_empty());
    }

    #[test]
    fn test_build_time_and_memory_regressions() {
        let mut history: Vec<BuildResult> = (0..3)
            .map(|_| {
                let mut b = build("ios", "development", 1000, 1000);
                b.metrics.insert(MEMORY_USAGE_METRIC.to_string(), 100.0);
                b
            })
            .collect();
        let mut latest = build("ios", "development", 1000, 1500);
        latest.metrics.insert(MEMORY_USAGE_METRIC.to_string(), 200.0);
        history.push(latest);

        let found = RegressionAnalyzer::new(RegressionConfig::default()).analyze(&history, 10);
        let metrics: Vec<_> = found.iter().map(|r| r.metric).collect();
        assert_eq!(metrics, vec![RegressionMetric::BuildTime, RegressionMetric::MemoryUsage]);
        // 100% memory growth is above 15 × 2.0
        assert_eq!(found[1].severity, RegressionSeverity::Major);
    }

    #[test]
    fn test_recent_returns_tail() {
        let mut analyzer = RegressionAnalyzer::new(RegressionConfig::default());
        for _ in 0..3 {
            let history = vec![
                build("android", "production", 100, 1000),
                build("android", "production", 200, 1000),
            ];
            analyzer.analyze(&history, 10);
        }
        assert_eq!(analyzer.regressions().len(), 3);
        assert_eq!(analyzer.recent(2).len(), 2);
        assert_eq!(analyzer.recent(RECENT_REGRESSIONS).len(), 3);
    }
}
