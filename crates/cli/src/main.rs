//! AppForge CLI — the main entry point.
//!
//! Commands:
//! - `agent`   — Interactive plan/build/test session on a project directory
//! - `config`  — Show the effective configuration or write a starter file
//! - `doctor`  — Diagnose configuration and provider settings

use std::path::PathBuf;

use appforge_core::agent::Mode;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "appforge",
    about = "AppForge — an agent that plans, builds and tests web apps",
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
    /// Work on a project with the agent
    Agent {
        /// Project directory (defaults to workspace.root, then the current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Starting mode: plan, build, test or auto
        #[arg(long)]
        mode: Option<Mode>,

        /// Send this message first instead of waiting for input
        #[arg(short, long)]
        message: Option<String>,

        /// Run QA automatically after an auto-mode build
        #[arg(long)]
        auto_test: Option<bool>,
    },

    /// Show the effective configuration
    Config {
        /// Write a starter config file instead
        #[arg(long)]
        init: bool,
    },

    /// Diagnose configuration and provider settings
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the streamed model text.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Agent {
            project,
            mode,
            message,
            auto_test,
        } => {
            commands::agent::run(commands::agent::AgentArgs {
                project,
                mode,
                message,
                auto_test,
            })
            .await?
        }
        Commands::Config { init } => {
            if init {
                commands::config_cmd::init()?
            } else {
                commands::config_cmd::show()?
            }
        }
        Commands::Doctor => commands::doctor::run()?,
    }

    Ok(())
}
