//! RustedChat CLI — the main entry point.
//!
//! Commands:
//! - `run`          — Interactive chat in the terminal
//! - `once`         — Send a single message and print the reply
//! - `models`       — List the models the backend offers
//! - `init-config`  — Print (or write) a default config file
//! - `config`       — Show, locate or validate the config file

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "rustedchat",
    about = "RustedChat — character chat over text-generation backends",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.rustedchat/config.toml
    #[arg(short, long, global = true, env = "RUSTEDCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the bot in the terminal
    Run,

    /// Send a single message and print what the bot delivers
    Once {
        /// The message, including any control prefix
        #[arg(short, long)]
        message: String,

        /// Chat id whose saved session is used
        #[arg(long, default_value_t = 0)]
        chat: i64,

        /// Keep the session in memory instead of the history directory
        #[arg(long)]
        ephemeral: bool,
    },

    /// List models offered by the configured backend
    Models,

    /// Print a default config file
    InitConfig {
        /// Write it to the config path instead of printing
        #[arg(long)]
        write: bool,

        /// Overwrite an existing file when writing
        #[arg(long, requires = "write")]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the conversation
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run => commands::run::run(config_path, cli.verbose).await?,
        Commands::Once {
            message,
            chat,
            ephemeral,
        } => commands::once::run(config_path, &message, chat, ephemeral).await?,
        Commands::Models => commands::models::run(config_path).await?,
        Commands::InitConfig { write, force } => {
            commands::config_cmd::init(config_path, write, force).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path).await?,
        },
    }

    Ok(())
}
