//! `modsentry audit tail` -- show the most recent audit records.

use comfy_table::{Table, presets::UTF8_FULL};

use modsentry_core::AuditLog;
use modsentry_types::{AuditRecord, Config};

/// Longest reasoning excerpt shown in the table.
const REASONING_WIDTH: usize = 60;

pub async fn tail(config: &Config, lines: usize) -> anyhow::Result<()> {
    let path = config.state.audit_path();
    let records = AuditLog::tail(&path, lines).await?;

    if records.is_empty() {
        println!("No audit records in {}.", path.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header([
        "Time", "Item", "Author", "Verdict", "Acted", "Provider", "Tries", "Latency", "Reasoning",
    ]);
    for rec in &records {
        table.add_row(row(rec));
    }
    println!("{table}");
    Ok(())
}

fn row(rec: &AuditRecord) -> [String; 9] {
    [
        rec.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        rec.item_id.clone(),
        rec.author.clone().unwrap_or_else(|| "-".into()),
        rec.verdict.to_string(),
        if rec.action_taken { "yes" } else { "no" }.into(),
        rec.provider.clone(),
        rec.attempts.to_string(),
        format!("{}ms", rec.latency_ms),
        truncate(&rec.reasoning, REASONING_WIDTH),
    ]
}

fn truncate(s: &str, max: usize) -> String {
    let one_line = s.replace('\n', " ");
    if one_line.chars().count() <= max {
        one_line
    } else {
        let cut: String = one_line.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
