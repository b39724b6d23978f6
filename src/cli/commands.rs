//! CLI command definitions

use clap::{Args, ValueEnum};
use serde_json::{Map, Value};

/// Run a build
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Platforms to build (repeatable; defaults to the configured ones)
    #[arg(short, long)]
    pub platform: Vec<String>,

    /// Environments to build (repeatable; defaults to the configured ones)
    #[arg(short, long)]
    pub environment: Vec<String>,

    /// Project root the bundler runs in
    #[arg(long, default_value = ".")]
    pub project_root: String,

    /// Bundler command line; supports {platform}, {environment}, {output} and {build_id}
    #[arg(
        long,
        default_value = "npx react-native bundle --platform {platform} --entry-file index.js --bundle-output {output}"
    )]
    pub bundler: String,

    /// Configuration overrides (dotted.key=value, value parsed as JSON when possible)
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Where build history is kept
    #[arg(long, value_enum, default_value_t = StoreArg::Json)]
    pub store: StoreArg,

    /// Don't load or save build history
    #[arg(long)]
    pub no_history: bool,

    /// Skip the performance benchmark
    #[arg(long)]
    pub skip_benchmark: bool,

    /// Print the run as JSON
    #[arg(long)]
    pub json: bool,
}

/// Analyze build history for regressions
#[derive(Debug, Args, Clone)]
pub struct AnalyzeCommand {
    /// Number of recent history entries to analyze (defaults to the configured window)
    #[arg(short, long)]
    pub window: Option<usize>,

    #[arg(long, value_enum, default_value_t = StoreArg::Json)]
    pub store: StoreArg,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show build history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Only show builds for this platform
    #[arg(short, long)]
    pub platform: Option<String>,

    /// Number of recent builds to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    #[arg(long, value_enum, default_value_t = StoreArg::Json)]
    pub store: StoreArg,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Validate a configuration file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to configuration YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Print the effective configuration
#[derive(Debug, Args, Clone)]
pub struct ConfigCommand {
    /// Output in JSON instead of YAML
    #[arg(long)]
    pub json: bool,
}

/// History backend argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    Json,
    #[cfg(feature = "sqlite")]
    Sqlite,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Build a nested override document from dotted key=value pairs
pub fn overrides_from_pairs(pairs: &[(String, String)]) -> Value {
    let mut root = Map::new();
    for (key, raw) in pairs {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
        let mut segments: Vec<&str> = key.split('.').collect();
        let last = segments.pop().unwrap_or_default();

        let mut node = &mut root;
        for segment in segments {
            let entry = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            node = match entry {
                Value::Object(map) => map,
                _ => unreachable!("entry was just made an object"),
            };
        }
        node.insert(last.to_string(), value);
    }
    Value::Object(root)
}
