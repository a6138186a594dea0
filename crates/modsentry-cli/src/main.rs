//! `modsentry` -- CLI binary for the modsentry moderation pipeline.
//!
//! Provides the following subcommands:
//!
//! - `modsentry run` -- Start the poller and the processing pipeline.
//! - `modsentry status` -- Show checkpoint, queue depth and audit totals.
//! - `modsentry check` -- Probe the configured analysis backend.
//! - `modsentry checkpoint` -- Show or reset the poll checkpoint.
//! - `modsentry audit` -- Inspect the audit log.
//! - `modsentry wiki` -- Inspect, publish or clear the wiki removal log.

use clap::{Parser, Subcommand};

mod commands;

/// Automated comment moderation with an LLM classifier.
#[derive(Parser)]
#[command(name = "modsentry", about = "Automated comment moderation", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (overrides MODSENTRY_CONFIG and auto-discovery).
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start polling and moderating until Ctrl+C.
    Run(commands::run::RunArgs),

    /// Show pipeline state.
    Status,

    /// Check that the analysis backend is reachable and configured.
    Check,

    /// Inspect or reset the poll checkpoint.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Inspect the audit log.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Manage the public removal log on the subreddit wiki.
    Wiki {
        #[command(subcommand)]
        action: WikiAction,
    },
}

/// Checkpoint subcommands.
#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the stored checkpoint.
    Show,

    /// Move the checkpoint to now, or N days back to re-scan history.
    Reset {
        /// Rewind the checkpoint this many days instead of resetting to now.
        #[arg(long, default_value_t = 0)]
        days_back: u32,
    },
}

/// Audit subcommands.
#[derive(Subcommand)]
enum AuditAction {
    /// Show the most recent audit records.
    Tail {
        /// Number of records to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,
    },
}

/// Wiki subcommands.
#[derive(Subcommand)]
enum WikiAction {
    /// Show the stored log and publish state.
    Status,

    /// Rewrite the wiki page now.
    Publish,

    /// Drop every stored entry and reset the counters.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let cfg = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run::run(args, cfg).await?,
        Commands::Status => commands::status::run(&cfg).await?,
        Commands::Check => commands::check::run(&cfg).await?,
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Show => commands::checkpoint::show(&cfg)?,
            CheckpointAction::Reset { days_back } => {
                commands::checkpoint::reset(&cfg, days_back)?;
            }
        },
        Commands::Audit { action } => match action {
            AuditAction::Tail { lines } => commands::audit::tail(&cfg, lines).await?,
        },
        Commands::Wiki { action } => match action {
            WikiAction::Status => commands::wiki::status(&cfg)?,
            WikiAction::Publish => commands::wiki::publish(&cfg).await?,
            WikiAction::Clear => commands::wiki::clear(&cfg)?,
        },
    }

    Ok(())
}
