//! CLI output formatting

use crate::analysis::{PerformanceRegression, RegressionSeverity};
use crate::core::{BuildResult, PipelineRun, RunStatus};
use crate::execution::PipelineEvent;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a spinner shown while a build is in flight
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a run status for display
pub fn format_run_status(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Degraded => style("DEGRADED").yellow().to_string(),
    }
}

/// One line per build result
pub fn format_build_result(result: &BuildResult) -> String {
    let icon = if result.success {
        CHECK
    } else if result.degraded {
        WARN
    } else {
        CROSS
    };

    format!(
        "{} {}/{} - {} - {} - {} ({})",
        icon,
        style(&result.platform).bold(),
        style(&result.environment).bold(),
        style(format_bytes(result.bundle_size)).cyan(),
        style(format_duration(Duration::from_millis(result.duration_ms))).dim(),
        style(&result.git.branch).dim(),
        style(&result.build_id).dim()
    )
}

pub fn format_regression(regression: &PerformanceRegression) -> String {
    let severity = match regression.severity {
        RegressionSeverity::Minor => style("minor").yellow().to_string(),
        RegressionSeverity::Major => style("major").red().to_string(),
    };
    format!(
        "{} {}/{} {} +{:.1}% ({:.0} -> {:.0}) [{}]",
        WARN,
        regression.platform,
        regression.environment,
        style(regression.metric).bold(),
        regression.regression,
        regression.baseline,
        regression.current,
        severity
    )
}

/// Format a pipeline event for display
pub fn format_pipeline_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::Initialized {
            platforms,
            environments,
            ci_provider,
        } => {
            let ci = ci_provider
                .as_deref()
                .map(|p| format!(" (CI: {})", p))
                .unwrap_or_default();
            format!(
                "{} Pipeline ready: {} × {}{}",
                ROCKET,
                style(platforms.join(", ")).cyan(),
                style(environments.join(", ")).cyan(),
                ci
            )
        }
        PipelineEvent::Completed {
            build_id,
            degraded,
            successful,
            failed,
        } => {
            let status = if *degraded {
                style("completed in degraded mode").yellow().to_string()
            } else {
                style("completed successfully").green().to_string()
            };
            format!(
                "{} Build {} {} ({} succeeded, {} failed)",
                if *degraded { WARN } else { CHECK },
                style(build_id).dim(),
                status,
                style(successful).green(),
                style(failed).red()
            )
        }
        PipelineEvent::Failed { build_id, error } => {
            format!("{} Build {} failed: {}", CROSS, style(build_id).dim(), style(error).red())
        }
        PipelineEvent::RegressionDetected {
            build_id,
            regressions,
        } => format!(
            "{} {} performance regression(s) detected in {}",
            WARN,
            style(regressions.len()).yellow(),
            style(build_id).dim()
        ),
    }
}

/// Summary printed after a run
pub fn format_run_summary(run: &PipelineRun) -> String {
    let mut lines = vec![format!(
        "{} Build {} {} in {}",
        INFO,
        style(&run.build_id).bold(),
        format_run_status(run.status),
        format_duration(Duration::from_millis(run.duration_ms))
    )];
    lines.extend(run.results.iter().map(|r| format!("  {}", format_build_result(r))));
    for result in &run.results {
        for warning in &result.warnings {
            lines.push(format!("    {} {}", WARN, style(warning).yellow()));
        }
    }
    lines.extend(run.regressions.iter().map(|r| format!("  {}", format_regression(r))));
    if let Some(path) = &run.report_path {
        lines.push(format!("{} Report: {}", INFO, style(path.display()).dim()));
    }
    lines.join("\n")
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let bytes = bytes as f64;
    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < KB * KB {
        format!("{:.1} KB", bytes / KB)
    } else {
        format!("{:.2} MB", bytes / (KB * KB))
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
