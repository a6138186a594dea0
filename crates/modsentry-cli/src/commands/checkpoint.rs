//! `modsentry checkpoint` -- show or reset the poll checkpoint.
//!
//! Resetting is the only way to move the checkpoint backwards. Stop the
//! service first; a running poller keeps its own copy in memory.

use chrono::{DateTime, Duration, Utc};

use modsentry_core::CheckpointStore;
use modsentry_types::Config;

pub fn show(config: &Config) -> anyhow::Result<()> {
    let path = config.state.checkpoint_path();
    match CheckpointStore::read(&path)? {
        Some(ts) => {
            let age = Utc::now().signed_duration_since(ts);
            println!("{} ({} ago)", ts.to_rfc3339(), format_age(age));
        }
        None => println!("no checkpoint at {}", path.display()),
    }
    Ok(())
}

pub fn reset(config: &Config, days_back: u32) -> anyhow::Result<()> {
    let path = config.state.checkpoint_path();
    let previous = CheckpointStore::read(&path)?;
    let ts = reset_target(Utc::now(), days_back);
    CheckpointStore::overwrite(&path, ts)?;

    tracing::info!(
        previous = previous.map(|p| p.to_rfc3339()).unwrap_or_default(),
        checkpoint = %ts.to_rfc3339(),
        "checkpoint reset"
    );
    match previous {
        Some(prev) => println!("checkpoint: {} -> {}", prev.to_rfc3339(), ts.to_rfc3339()),
        None => println!("checkpoint: {}", ts.to_rfc3339()),
    }
    Ok(())
}

fn reset_target(now: DateTime<Utc>, days_back: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days_back))
}

fn format_age(age: Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h{}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d{}h", s / 86_400, (s % 86_400) / 3600),
    }
}
