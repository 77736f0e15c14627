//! Switchyard CLI: the main entry point.
//!
//! Commands:
//! - `init`    Write the default config and a sample catalog
//! - `config`  Show, validate or locate the config
//! - `tools`   List the tool catalog a run would offer
//! - `run`     Single-message or interactive conversation
//! - `mcp`     Connect external servers and inspect their tools
//! - `import`  Turn a one-click JSON document or a preset into a server entry

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use switchyard_config::AppConfig;

mod catalog;
mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "switchyard",
    about = "Switchyard: LLM tool orchestration over web, code and external tool servers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to ~/.switchyard/config.toml)
    #[arg(long, global = true, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config and a sample catalog
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<commands::config_cmd::ConfigAction>,
    },

    /// List the model-visible tool catalog
    Tools {
        #[arg(long)]
        catalog: PathBuf,

        /// Connect external servers first so their tools are listed
        #[arg(long)]
        connect: bool,
    },

    /// Answer a message, or chat interactively without one
    Run {
        #[arg(long)]
        catalog: PathBuf,

        #[arg(short, long)]
        message: Option<String>,

        /// Image sent with the message
        #[arg(long)]
        image: Option<PathBuf>,

        /// Classify each message's intent before answering
        #[arg(long)]
        intent: bool,
    },

    /// External tool servers
    Mcp {
        #[command(subcommand)]
        action: commands::mcp::McpAction,
    },

    /// Convert a one-click document or a preset into a `[[server]]` entry
    Import(commands::import::ImportArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    match cli.command {
        Commands::Init { force } => commands::init::run(&config_path, force)?,
        Commands::Config { action } => commands::config_cmd::run(&config_path, action.unwrap_or_default())?,
        Commands::Tools { catalog, connect } => commands::tools::run(load_config(&config_path)?, &catalog, connect).await?,
        Commands::Run {
            catalog,
            message,
            image,
            intent,
        } => {
            let config = load_config(&config_path)?;
            commands::run::run(config, &catalog, message, image, intent).await?
        }
        Commands::Mcp { action } => commands::mcp::run(load_config(&config_path)?, action).await?,
        Commands::Import(args) => commands::import::run(args)?,
    }

    Ok(())
}

fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    AppConfig::load_from(path).map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
