//! RAGFlow CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Interactive question answering over the local corpus
//! - `ask`     — Answer one question and print the step report
//! - `serve`   — Start the HTTP API server
//! - `status`  — Show configuration and index status
//! - `init`    — Write a default config file

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ragflow_config::{AppConfig, LogFormat};

mod bootstrap;
mod commands;

#[derive(Parser)]
#[command(
    name = "ragflow",
    about = "RAGFlow — retrieval-augmented answers that ask when unsure",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.ragflow/config.toml
    #[arg(short, long, global = true, env = "RAGFLOW_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat interactively; questions in one chat share a session
    Chat {
        /// Resume a session id instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Answer a single question
    Ask {
        /// The question
        query: String,

        /// Print the status report as JSON
        #[arg(long)]
        json: bool,

        /// Session id to continue
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Start the HTTP API server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configuration and index status
    Status,

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let path = cli.config.as_deref();

    match cli.command {
        Commands::Init { force } => {
            init_tracing(cli.verbose, "info", LogFormat::Pretty);
            commands::init::run(path, force).await?
        }
        Commands::Chat { session } => commands::chat::run(setup(path, cli.verbose)?, session).await?,
        Commands::Ask { query, json, session } => {
            commands::ask::run(setup(path, cli.verbose)?, query, json, session).await?
        }
        Commands::Serve { port } => commands::serve::run(setup(path, cli.verbose)?, port).await?,
        Commands::Status => commands::status::run(setup(path, cli.verbose)?, path).await?,
    }

    Ok(())
}

fn setup(path: Option<&Path>, verbose: bool) -> anyhow::Result<AppConfig> {
    let config = bootstrap::load_config(path)?;
    init_tracing(verbose, &config.log_level, config.log_format);
    Ok(config)
}

/// `RUST_LOG` wins; otherwise `--verbose` means debug, else the configured level.
fn init_tracing(verbose: bool, level: &str, format: LogFormat) {
    let fallback = if verbose { "debug" } else { level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
