use build_pipeline::cli::commands::{
    overrides_from_pairs, AnalyzeCommand, ConfigCommand, HistoryCommand, RunCommand, StoreArg,
    ValidateCommand,
};
use build_pipeline::cli::output::*;
use build_pipeline::cli::{Cli, Command};
use build_pipeline::persistence::{HistoryStore, InMemoryHistoryStore, JsonHistoryStore};
use build_pipeline::services::{BuildServices, CommandBundler, DirectoryCache, TracingTelemetry};
use build_pipeline::{BuildError, BuildOptions, BuildPipeline, BuildPipelineConfig};

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = load_config(cli.config.as_deref())?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_build(cmd, config).await?,
        Command::Analyze(cmd) => analyze(cmd, config).await?,
        Command::History(cmd) => show_history(cmd, &config).await?,
        Command::Validate(cmd) => validate_config(cmd)?,
        Command::Config(cmd) => print_config(cmd, &config)?,
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<BuildPipelineConfig> {
    match path {
        Some(path) => BuildPipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path)),
        None => Ok(BuildPipelineConfig::default()),
    }
}

async fn open_store(store: StoreArg, config: &BuildPipelineConfig) -> Result<Arc<dyn HistoryStore>> {
    Ok(match store {
        StoreArg::Json => Arc::new(JsonHistoryStore::new(&config.artifacts.history_path)),
        #[cfg(feature = "sqlite")]
        StoreArg::Sqlite => Arc::new(
            build_pipeline::persistence::SqliteHistoryStore::with_default_path()
                .await
                .context("Failed to open history database")?,
        ),
    })
}

fn services(cmd: &RunCommand, project_root: &Path) -> Result<BuildServices> {
    let bundler = CommandBundler::from_command_line(&cmd.bundler)
        .context("Bundler command must not be empty")?;
    Ok(BuildServices::new(
        Arc::new(bundler),
        Arc::new(DirectoryCache::new(project_root.join(".build-cache"))),
        Arc::new(TracingTelemetry::new()),
    ))
}

async fn run_build(cmd: &RunCommand, config: BuildPipelineConfig) -> Result<()> {
    let project_root = Path::new(&cmd.project_root);
    let store: Arc<dyn HistoryStore> = if cmd.no_history {
        Arc::new(InMemoryHistoryStore::new())
    } else {
        open_store(cmd.store, &config).await?
    };

    let pipeline = BuildPipeline::new(config, services(cmd, project_root)?, store);
    let quiet = cmd.json;
    pipeline.subscribe(move |event| {
        if !quiet {
            println!("{}", format_pipeline_event(&event));
        }
    });

    let overrides = overrides_from_pairs(&cmd.set);
    pipeline
        .initialize(&overrides)
        .await
        .context("Failed to initialize pipeline")?;

    let mut options = BuildOptions::new(project_root);
    if !cmd.platform.is_empty() {
        options = options.platforms(cmd.platform.iter().cloned());
    }
    if !cmd.environment.is_empty() {
        options = options.environments(cmd.environment.iter().cloned());
    }
    options.skip_benchmark = cmd.skip_benchmark;

    let spinner = (!quiet).then(|| create_spinner("Building..."));
    let result = pipeline.execute_build(options).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match result {
        Ok(run) => {
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                println!("\n{}", format_run_summary(&run));
            }
            Ok(())
        }
        Err(BuildError::NotReady(status)) => {
            println!("{} Pipeline not ready ({:?}); is it disabled?", WARN, status);
            Ok(())
        }
        Err(e) => {
            println!("\n{} {}", CROSS, style("Build failed").red());
            error!("{}", e);
            if let BuildError::Pipeline(pipeline_error) = &e {
                for suggestion in &pipeline_error.context.recovery_suggestions {
                    println!("  {} {}", INFO, suggestion);
                }
            }
            std::process::exit(1);
        }
    }
}

async fn analyze(cmd: &AnalyzeCommand, config: BuildPipelineConfig) -> Result<()> {
    let window = cmd.window.unwrap_or(config.regression.analysis_window);
    let store = open_store(cmd.store, &config).await?;

    // Collaborators are never invoked by an analysis-only pipeline
    let services = BuildServices::new(
        Arc::new(CommandBundler::new("true", Vec::new())),
        Arc::new(DirectoryCache::new(std::env::temp_dir().join("build-pipeline-cache"))),
        Arc::new(TracingTelemetry::new()),
    );
    let pipeline = BuildPipeline::new(config, services, store);
    pipeline
        .initialize(&json!({}))
        .await
        .context("Failed to load build history")?;

    let regressions = pipeline.analyze_regressions(window).await;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&regressions)?);
        return Ok(());
    }

    if regressions.is_empty() {
        println!("{} No regressions in the last {} builds", CHECK, window);
    } else {
        println!("{} {} regression(s) in the last {} builds:", WARN, regressions.len(), window);
        for regression in &regressions {
            println!("  {}", format_regression(regression));
            for recommendation in &regression.recommendations {
                println!("    {} {}", INFO, style(recommendation).dim());
            }
        }
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand, config: &BuildPipelineConfig) -> Result<()> {
    let store = open_store(cmd.store, config).await?;
    let history = store.load().await.context("Failed to load build history")?;

    let builds: Vec<_> = history
        .iter()
        .rev()
        .filter(|r| cmd.platform.as_ref().map_or(true, |p| &r.platform == p))
        .take(cmd.limit)
        .collect();

    if builds.is_empty() {
        println!("{} No builds found", INFO);
        return Ok(());
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&builds)?);
        return Ok(());
    }

    println!("{} Build history (showing latest {}):", INFO, builds.len());
    for result in builds {
        println!("  {}", format_build_result(result));
        if cmd.verbose {
            println!(
                "    commit {} by {}: {}",
                style(&result.git.commit).dim(),
                result.git.author,
                result.git.message
            );
            for error in &result.errors {
                println!("    {} {}", CROSS, style(error).red());
            }
            for warning in &result.warnings {
                println!("    {} {}", WARN, style(warning).yellow());
            }
        }
    }
    Ok(())
}

fn validate_config(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating configuration...", INFO);

    match BuildPipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Configuration is valid!", CHECK);
            println!("  Platforms: {}", style(config.platforms.join(", ")).cyan());
            println!("  Environments: {}", style(config.environments.join(", ")).cyan());
            println!(
                "  Regression thresholds: bundle {}%, build time {}%, memory {}%",
                config.regression.threshold_bundle_size,
                config.regression.threshold_build_time,
                config.regression.threshold_memory_usage
            );

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

fn print_config(cmd: &ConfigCommand, config: &BuildPipelineConfig) -> Result<()> {
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", serde_yaml::to_string(config)?);
    }
    Ok(())
}
