//! `modsentry status` -- read-only view of the durable state.
//!
//! Reads the checkpoint, queue snapshot and audit log straight from the
//! state directory; it never opens them for writing, so it is safe to run
//! next to a live service.

use chrono::Utc;
use comfy_table::{Table, presets::UTF8_FULL};

use modsentry_core::{AuditLog, CheckpointStore, PersistentQueue};
use modsentry_types::Config;

use super::config_path;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    config.validate_values()?;
    let state = &config.state;

    let checkpoint = CheckpointStore::read(&state.checkpoint_path())?;
    let snapshot = PersistentQueue::read_snapshot(&state.queue_path())?;
    let stats = AuditLog::stats_of(&state.audit_path()).await?;

    println!("modsentry status");
    println!();
    match config_path() {
        Some(p) => println!("  Config:     {}", p.display()),
        None => println!("  Config:     (defaults, no config file found)"),
    }
    println!("  State dir:  {}", state.dir_path().display());
    println!("  Subreddit:  {}", display_or_unset(&config.source.subreddit));
    println!("  Provider:   {}", config.backend.provider);
    println!(
        "  Safe mode:  {}",
        if config.moderation.safe_mode { "on" } else { "off" }
    );
    println!();

    let now = Utc::now();
    let (depth, waiting, max_attempts) = match &snapshot {
        Some(s) => (
            s.entries.len(),
            s.entries
                .iter()
                .filter(|e| e.entry.next_eligible_at > now)
                .count(),
            s.entries
                .iter()
                .map(|e| e.entry.attempt_count)
                .max()
                .unwrap_or(0),
        ),
        None => (0, 0, 0),
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Metric", "Value"]);
    table.add_row([
        "Checkpoint".to_string(),
        checkpoint
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "(none, first poll fetches newest page)".into()),
    ]);
    table.add_row(["Queue depth".to_string(), depth.to_string()]);
    table.add_row(["  backing off".to_string(), waiting.to_string()]);
    table.add_row(["  max attempts".to_string(), max_attempts.to_string()]);
    table.add_row(["Processed".to_string(), stats.processed.to_string()]);
    table.add_row(["  ACT".to_string(), stats.act.to_string()]);
    table.add_row(["  NO_ACT".to_string(), stats.no_act.to_string()]);
    table.add_row(["  SKIP".to_string(), stats.skip.to_string()]);
    table.add_row(["Actions taken".to_string(), stats.actions_taken.to_string()]);
    table.add_row([
        "Removal rate".to_string(),
        format!("{:.1}%", stats.removal_rate()),
    ]);
    table.add_row(["Est. cost".to_string(), format!("${:.4}", stats.total_cost)]);
    println!("{table}");

    Ok(())
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() { "(not set)" } else { value }
}
