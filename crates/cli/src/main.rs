//! toolchat CLI — the main entry point.
//!
//! Commands:
//! - `chat`     — Interactive or single-message chat with tool use
//! - `history`  — Query the tool-call journal
//! - `config`   — Show or initialize configuration
//! - `doctor`   — Diagnose setup

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "toolchat",
    about = "toolchat — a local chat agent that calls tools",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (same as --log-level debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// Log format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Read configuration from this file instead of ~/.toolchat/config.toml
    #[arg(long, global = true, env = "TOOLCHAT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat(commands::chat::ChatArgs),

    /// Query recorded tool calls
    History {
        #[command(subcommand)]
        action: commands::history::HistoryAction,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose setup
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Config decides the defaults; flags win.
    let logging = commands::load_config(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        cli.log_level.unwrap_or(logging.level)
    };
    let format = cli.log_format.unwrap_or(logging.format);
    init_tracing(&level, &format);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Chat(args) => commands::chat::run(config_path, args).await?,
        Commands::History { action } => commands::history::run(config_path, action).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
        },
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}

/// Logs go to stderr so streamed replies on stdout stay clean.
fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
