//! Kestrel CLI: entry point.
//!
//! # Commands
//!
//! - `kestrel agent [-m MESSAGE] [-s SESSION] [--mode MODE] [--model MODEL]`: single-shot or REPL
//! - `kestrel status`: show configuration and provider status
//! - `kestrel history [-s SESSION] [--clear]`: list, show, or delete stored sessions

mod helpers;
mod history;
mod repl;
mod status;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use kestrel_core::config::load_config;
use kestrel_core::Mode;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Kestrel: a coding agent for your terminal
#[derive(Parser)]
#[command(name = "kestrel", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task (single-shot) or start the interactive REPL
    Agent {
        /// Single task (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Session identifier; history is stored under this name
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Pin the mode (auto, reason, code, build, debug, optimize, docs)
        #[arg(long)]
        mode: Option<Mode>,

        /// Lock every call to this model
        #[arg(long)]
        model: Option<String>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and provider status
    Status,

    /// List stored sessions, or show / clear one
    History {
        /// Session to show (or clear with --clear)
        #[arg(short, long)]
        session: Option<String>,

        /// Delete the session's stored history
        #[arg(long, default_value_t = false, requires = "session")]
        clear: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent {
            message,
            session,
            mode,
            model,
            logs,
        } => {
            init_logging(logs);
            run_agent(message, session, mode, model).await
        }
        Commands::Status => status::run(),
        Commands::History { session, clear } => {
            init_logging(false);
            history::run(session.as_deref(), clear)
        }
    }
}

// ─────────────────────────────────────────────
// Agent command
// ─────────────────────────────────────────────

async fn run_agent(
    message: Option<String>,
    session_id: String,
    mode: Option<Mode>,
    model: Option<String>,
) -> Result<()> {
    let config = load_config(None);
    let mut runtime = helpers::Runtime::build(&config, &session_id, mode, model)?;

    match message {
        Some(task) => {
            info!(session = %session_id, "running single task");
            let result = runtime
                .run_task(&task)
                .await
                .context("agent run failed")?;
            helpers::print_footer(&result);
        }
        None => repl::run(runtime).await?,
    }

    Ok(())
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("kestrel=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
