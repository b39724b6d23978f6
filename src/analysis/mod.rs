//! Performance analysis over build history

pub mod regression;

pub use regression::{
    PerformanceRegression, RegressionAnalyzer, RegressionMetric, RegressionSeverity,
    RECENT_REGRESSIONS,
};
