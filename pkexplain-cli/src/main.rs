//! pkexplain CLI: predict and explain drug concentrations from the terminal.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// pkexplain: explainable drug-concentration prediction
#[derive(Parser, Debug)]
#[command(name = "pkexplain", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (searched for .pkexplain/config.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List the input features, their domains and defaults
    Schema {
        /// Print the schema as JSON
        #[arg(long)]
        json: bool,
    },
    /// Predict a concentration and explain it
    Predict {
        /// Model artifact (overrides model.path)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// JSON file with feature values, e.g. {"AGE": 8, "SEX": 1}
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Set a single feature, e.g. --set WT=32.5 (repeatable)
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,

        /// Number of contributions to show (overrides attribution.top_n)
        #[arg(long)]
        top: Option<usize>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Score predictions against observed concentrations
    Report {
        /// JSON file with true_values and predicted_values
        #[arg(short, long)]
        samples: PathBuf,

        /// Absolute tolerance band (mg/L)
        #[arg(long)]
        absolute_tolerance: Option<f64>,

        /// Relative tolerance band as a fraction of the true value
        #[arg(long)]
        relative_tolerance: Option<f64>,

        /// Skip the relative tolerance band
        #[arg(long, conflicts_with = "relative_tolerance")]
        no_relative_tolerance: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = pkexplain_core::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Set up tracing: human-readable stderr + optional JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error".to_string(),
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let (json_layer, _guard) = if config.logging.json_file {
        let log_dir = directories::ProjectDirs::from("dev", "pkexplain", "pkexplain")
            .map(|d| d.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("."));
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "pkexplain.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new("debug"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, &workspace, config)
}
