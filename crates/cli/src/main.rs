//! Strata CLI: the main entry point.
//!
//! Commands:
//! - `assemble`: build and print a context window (no model call)
//! - `chat`: run one full turn against the configured provider
//! - `memory`: search stored memories
//! - `config`: show or initialize configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata: layered context assembly for LLM applications",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Session to act on
    #[arg(long, global = true, env = "STRATA_SESSION", default_value = "cli")]
    session: String,

    /// User that owns the session
    #[arg(long, global = true, env = "STRATA_USER", default_value = "local")]
    user: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a context window for a message and print it
    Assemble {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Attach a text file (repeatable)
        #[arg(short, long = "attach")]
        attach: Vec<PathBuf>,

        /// Override the token budget
        #[arg(short, long)]
        budget: Option<usize>,

        /// Print the full window as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send one message through the full pipeline
    Chat {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Attach a text file (repeatable)
        #[arg(short, long = "attach")]
        attach: Vec<PathBuf>,
    },

    /// Memory commands
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Search the user's memories
    Search {
        query: String,

        /// Restrict to one tier: short, medium or long
        #[arg(short, long)]
        tier: Option<String>,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration with secrets redacted
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Assemble {
            message,
            attach,
            budget,
            json,
        } => {
            commands::assemble::run(&cli.user, &cli.session, &message, &attach, budget, json)
                .await?
        }
        Commands::Chat { message, attach } => {
            commands::chat::run(&cli.user, &cli.session, &message, &attach).await?
        }
        Commands::Memory { command } => match command {
            MemoryCommands::Search { query, tier, limit } => {
                commands::memory::search(&cli.user, &query, tier.as_deref(), limit).await?
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_cmd::show()?,
            ConfigCommands::Init { force } => commands::config_cmd::init(force)?,
        },
    }

    Ok(())
}
