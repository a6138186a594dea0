//! `modsentry run` -- poll the subreddit and moderate until Ctrl+C.
//!
//! Builds the Reddit client and the configured backend, opens durable state
//! and runs the poller and pipeline side by side. Ctrl+C cancels both; a fatal
//! backend configuration error stops the service and exits non-zero. With
//! `wiki.enabled`, applied removals also feed the wiki publisher task.

use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use modsentry_core::{Clock, ContentSource, EventBus, ModerationService, SystemClock};
use modsentry_llm::build_backend;
use modsentry_reddit::wiki::WIKI_CHANNEL_CAPACITY;
use modsentry_reddit::{RedditClient, WikiSink};
use modsentry_types::Config;

/// Arguments for `modsentry run`.
#[derive(Args)]
pub struct RunArgs {
    /// Force safe mode: classify and audit, but never remove anything.
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(args: RunArgs, mut config: Config) -> anyhow::Result<()> {
    if args.dry_run {
        config.moderation.safe_mode = true;
    }
    config.validate()?;

    let backend = build_backend(&config.backend)?;
    let reddit = Arc::new(
        RedditClient::new(&config.source)
            .map_err(|e| anyhow::anyhow!("failed to build reddit client: {e}"))?,
    );
    let source: Arc<dyn ContentSource> = reddit.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cancel = CancellationToken::new();

    let mut events = EventBus::tracing();
    let wiki_task = if config.wiki.enabled {
        let publisher = Arc::new(super::wiki::publisher(&config, reddit, clock.clone())?);
        let (sink, rx) = WikiSink::new(WIKI_CHANNEL_CAPACITY, clock.clone());
        events = events.with_sink(Arc::new(sink));
        info!(page = %publisher.page_url(), "wiki transparency enabled");
        let token = cancel.child_token();
        Some(tokio::spawn(async move { publisher.run(rx, token).await }))
    } else {
        None
    };

    let service = ModerationService::open(&config, source, backend, clock, events).await?;

    if config.moderation.safe_mode {
        warn!("safe mode is on: removals are logged, not performed");
    }
    info!(
        subreddit = %config.source.subreddit,
        provider = %config.backend.provider,
        state_dir = %config.state.dir_path().display(),
        "modsentry running -- press Ctrl+C to stop"
    );

    let signal_cancel = cancel.clone();
    let signal = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl+C"),
        }
        signal_cancel.cancel();
    });

    let result = service.run(cancel.clone()).await;
    signal.abort();
    cancel.cancel();
    if let Some(task) = wiki_task
        && let Err(e) = task.await
    {
        warn!(error = %e, "wiki publisher task failed");
    }

    let stats = service.audit().stats().await;
    info!(
        processed = stats.processed,
        act = stats.act,
        no_act = stats.no_act,
        skip = stats.skip,
        queued = service.queue().len(),
        "modsentry stopped"
    );
    result.map_err(Into::into)
}
