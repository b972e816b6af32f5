//! matagent CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write a default config
//! - `agent`: Interactive chat or single-question mode
//! - `gateway`: Start the HTTP server
//! - `tools`: List the tools the agent can call
//! - `config`: Validate, show, or locate the config
//! - `doctor`: Diagnose setup problems

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "matagent",
    about = "matagent: a materials science reasoning agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Ask the agent questions
    Agent {
        /// Ask a single question instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the tools visible to the agent
    Tools,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose configuration and credentials
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate the config file
    Validate,
    /// Print the effective config with secrets redacted
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Agent { message } => commands::agent::run(message).await?,
        Commands::Gateway { port } => commands::gateway::run(port).await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
