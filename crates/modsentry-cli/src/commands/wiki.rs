//! `modsentry wiki` -- the public removal log on the subreddit wiki.
//!
//! `status` and `clear` only touch `wiki.json` in the state directory.
//! `publish` rewrites the page right away, ignoring the minimum interval.

use std::sync::Arc;

use comfy_table::{Table, presets::UTF8_FULL};

use modsentry_core::{Clock, SystemClock};
use modsentry_reddit::{RedditClient, WikiPublisher, WikiStore};
use modsentry_types::Config;

/// Build the publisher the service and `wiki publish` share.
pub fn publisher(
    config: &Config,
    client: Arc<RedditClient>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<WikiPublisher> {
    let store = WikiStore::open(
        config.state.wiki_path(),
        config.state.write_attempts,
        config.wiki.max_entries,
    )?;
    Ok(WikiPublisher::new(
        client,
        Arc::new(store),
        config.source.subreddit.clone(),
        config.wiki.clone(),
        clock,
    ))
}

pub fn status(config: &Config) -> anyhow::Result<()> {
    config.validate_values()?;
    let log = WikiStore::read(&config.state.wiki_path())?;
    let wiki = &config.wiki;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Metric", "Value"]);
    table.add_row([
        "Enabled".to_string(),
        if wiki.enabled { "yes" } else { "no" }.to_string(),
    ]);
    if !config.source.subreddit.is_empty() {
        table.add_row([
            "Page".to_string(),
            format!(
                "https://www.reddit.com/r/{}/wiki/{}",
                config.source.subreddit, wiki.page
            ),
        ]);
    }
    table.add_row(["Entries".to_string(), log.entries.len().to_string()]);
    table.add_row(["Total removed".to_string(), log.removal_count.to_string()]);
    table.add_row([
        "Until next update".to_string(),
        wiki.update_threshold.saturating_sub(log.pending).to_string(),
    ]);
    table.add_row(["Last published".to_string(), stamp(log.last_published)]);
    table.add_row(["Last manual publish".to_string(), stamp(log.last_manual_publish)]);
    println!("{table}");
    Ok(())
}

pub async fn publish(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    let client = Arc::new(
        RedditClient::new(&config.source)
            .map_err(|e| anyhow::anyhow!("failed to build reddit client: {e}"))?,
    );
    let publisher = publisher(config, client, Arc::new(SystemClock))?;
    publisher.publish(true).await?;
    println!("published {}", publisher.page_url());
    Ok(())
}

pub fn clear(config: &Config) -> anyhow::Result<()> {
    let store = WikiStore::open(
        config.state.wiki_path(),
        config.state.write_attempts,
        config.wiki.max_entries,
    )?;
    let dropped = store.snapshot().entries.len();
    store.clear()?;
    println!("cleared {dropped} wiki entries");
    Ok(())
}

fn stamp(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "(never)".into())
}
