//! Shared fakes for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use modsentry_core::{
    Action, ChannelSink, ContentSource, EventBus, ManualClock, ModerationService,
};
use modsentry_llm::{Backend, BackendError, Classification, Ruleset};
use modsentry_types::{Config, Item, PipelineEvent, SourceError, Usage, VerdictKind};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn item_at(id: &str, body: &str, secs_after_t0: i64) -> Item {
    Item {
        id: id.into(),
        body: body.into(),
        author: format!("user_{id}"),
        created_at: t0() + ChronoDuration::seconds(secs_after_t0),
        permalink: format!("/r/test/comments/abc/x/{id}/"),
    }
}

// ── Content source ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSource {
    items: Mutex<Vec<Item>>,
    list_errors: Mutex<VecDeque<SourceError>>,
    remove_errors: Mutex<VecDeque<SourceError>>,
    removed: Mutex<HashSet<String>>,
    pub list_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
}

impl FakeSource {
    pub fn with_items(items: Vec<Item>) -> Arc<Self> {
        let src = Self::default();
        *src.items.lock().unwrap() = items;
        Arc::new(src)
    }

    pub fn push(&self, item: Item) {
        self.items.lock().unwrap().push(item);
    }

    pub fn fail_list(&self, err: SourceError) {
        self.list_errors.lock().unwrap().push_back(err);
    }

    pub fn fail_remove(&self, err: SourceError) {
        self.remove_errors.lock().unwrap().push_back(err);
    }

    pub fn is_removed(&self, id: &str) -> bool {
        self.removed.lock().unwrap().contains(id)
    }

    pub fn removals(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn list_new_items(
        &self,
        _source_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Item>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.list_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        // Like a real listing: newest first, and not strictly filtered.
        let mut items: Vec<Item> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| since.is_none_or(|s| i.created_at >= s))
            .cloned()
            .collect();
        items.reverse();
        Ok(items)
    }

    async fn apply_action(&self, item_id: &str, _action: Action) -> Result<(), SourceError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.remove_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.removed.lock().unwrap().insert(item_id.to_string());
        Ok(())
    }

    async fn is_action_applied(&self, item_id: &str, _action: Action) -> Result<bool, SourceError> {
        Ok(self.is_removed(item_id))
    }
}

// ── Backend ──────────────────────────────────────────────────────────────

/// Bodies containing "spam" are REMOVE, everything else KEEP, unless a
/// failure has been scripted for that body.
#[derive(Default)]
pub struct ScriptedBackend {
    failures: Mutex<HashMap<String, VecDeque<BackendError>>>,
    health: Mutex<Option<BackendError>>,
    pub calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `errors.len()` calls for `body` with these errors.
    pub fn fail(&self, body: &str, errors: Vec<BackendError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(body.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn unhealthy(&self, err: BackendError) {
        *self.health.lock().unwrap() = Some(err);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify(&self, text: &str, _ruleset: &Ruleset) -> modsentry_llm::Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(text)
            .and_then(|q| q.pop_front())
        {
            return Err(err);
        }
        let (verdict, reasoning) = if text.contains("spam") {
            (VerdictKind::Act, "DECISION: REMOVE")
        } else {
            (VerdictKind::NoAct, "DECISION: KEEP")
        };
        Ok(Classification {
            verdict,
            reasoning: reasoning.into(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 2,
                total_tokens: 12,
                estimated_cost: 0.001,
            },
        })
    }

    async fn check_health(&self) -> modsentry_llm::Result<()> {
        match self.health.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn unavailable() -> BackendError {
    BackendError::Unavailable("HTTP 503: overloaded".into())
}

// ── Harness ──────────────────────────────────────────────────────────────

pub fn test_config(dir: &TempDir, safe_mode: bool) -> Config {
    let mut config = Config::default();
    config.source.username = "modsentry_bot".into();
    config.source.subreddit = "test".into();
    config.state.dir = dir.path().to_string_lossy().into_owned();
    config.moderation.safe_mode = safe_mode;
    config
}

pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub source: Arc<FakeSource>,
    pub backend: Arc<ScriptedBackend>,
    pub service: ModerationService,
    pub events: mpsc::Receiver<PipelineEvent>,
}

impl Harness {
    pub async fn new(source: Arc<FakeSource>, safe_mode: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, source, ScriptedBackend::new(), safe_mode).await
    }

    pub async fn in_dir(
        dir: TempDir,
        source: Arc<FakeSource>,
        backend: Arc<ScriptedBackend>,
        safe_mode: bool,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(t0() + ChronoDuration::hours(1)));
        let config = test_config(&dir, safe_mode);
        let (sink, events) = ChannelSink::new(4096);
        let service = ModerationService::open(
            &config,
            source.clone(),
            backend.clone(),
            clock.clone(),
            EventBus::tracing().with_sink(Arc::new(sink)),
        )
        .await
        .unwrap();
        Self {
            dir,
            clock,
            source,
            backend,
            service,
            events,
        }
    }

    /// Reopen the service over the same state directory, as after a restart.
    pub async fn restart(self) -> Self {
        let Harness {
            dir,
            source,
            backend,
            service,
            ..
        } = self;
        drop(service);
        Self::in_dir(dir, source, backend, false).await
    }

    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }

    pub fn audit_lines(&self) -> Vec<serde_json::Value> {
        let path = self.dir.path().join("audit.jsonl");
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}
