//! Restart behaviour and the long-running service loop.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeSource, Harness, ScriptedBackend, item_at, unavailable};
use modsentry_core::{
    AuditLog, CheckpointStore, EventBus, ManualClock, ModerationService, PersistentQueue, Step,
};
use modsentry_llm::BackendError;
use modsentry_types::{AuditRecord, PipelineEvent, VerdictKind};
use tokio_util::sync::CancellationToken;

/// Test 1: snapshot with two entries and a checkpoint survives a restart;
/// polling resumes from the checkpoint without re-enqueueing.
#[tokio::test]
async fn resume_after_crash() {
    let source = FakeSource::with_items(vec![item_at("k1", "flaky", 10), item_at("k2", "calm", 20)]);
    let backend = ScriptedBackend::new();
    backend.fail("flaky", vec![unavailable()]);
    let h = Harness::in_dir(tempfile::tempdir().unwrap(), source.clone(), backend, false).await;

    h.service.poller().poll_once().await.unwrap();
    let step = h
        .service
        .pipeline()
        .process_next(&CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(step, Step::Requeued { .. }));
    // k2 is dequeued and then the process dies mid-analysis.
    let _in_flight = h.service.queue().dequeue();
    let checkpoint = h.service.checkpoint().get();
    assert!(checkpoint.is_some());

    let h = h.restart().await;
    let queue = h.service.queue();
    assert_eq!(queue.len(), 2);
    let snapshot = queue.snapshot();
    let k1 = snapshot.entries.iter().find(|e| e.item_id == "k1").unwrap();
    let k2 = snapshot.entries.iter().find(|e| e.item_id == "k2").unwrap();
    assert_eq!(k1.entry.attempt_count, 1);
    assert_eq!(k2.entry.attempt_count, 0);
    assert_eq!(h.service.checkpoint().get(), checkpoint);

    let report = h.service.poller().poll_once().await.unwrap();
    assert_eq!(report.enqueued, 0);

    h.service
        .pipeline()
        .drain(&CancellationToken::new())
        .await
        .unwrap();
    let lines = h.audit_lines();
    assert_eq!(lines.len(), 2);
    let k1_line = lines.iter().find(|l| l["item_id"] == "k1").unwrap();
    assert_eq!(k1_line["attempts"], 1);
    assert_eq!(k1_line["verdict"], "NO_ACT");
}

/// Test 2: an entry whose audit line was written just before a crash is
/// completed on restart without a second analysis.
#[tokio::test]
async fn audited_entry_is_not_reprocessed() {
    let source = FakeSource::with_items(vec![item_at("h1", "spam", 10)]);
    let h = Harness::new(source.clone(), false).await;
    h.service.poller().poll_once().await.unwrap();

    h.service
        .audit()
        .record(&AuditRecord {
            item_id: "h1".into(),
            verdict: VerdictKind::Act,
            action_taken: true,
            timestamp: common::t0(),
            provider: "scripted".into(),
            latency_ms: 5,
            reasoning: "DECISION: REMOVE".into(),
            attempts: 0,
            author: None,
            permalink: None,
            usage: None,
        })
        .await
        .unwrap();
    assert!(h.service.queue().contains("h1"));

    let h = h.restart().await;
    assert!(!h.service.queue().contains("h1"));
    assert_eq!(
        h.service
            .pipeline()
            .drain(&CancellationToken::new())
            .await
            .unwrap(),
        0
    );
    assert_eq!(h.backend.call_count(), 0);
    assert_eq!(source.removals(), 0);
    assert_eq!(h.audit_lines().len(), 1);
}

/// Test 3: the pipeline also tolerates an audited entry it dequeues.
#[tokio::test]
async fn already_audited_step() {
    let clock = Arc::new(ManualClock::new(common::t0()));
    let dir = tempfile::tempdir().unwrap();
    let queue = PersistentQueue::open(dir.path().join("queue.json"), 3, clock.clone()).unwrap();
    queue.enqueue(item_at("z1", "x", 1)).unwrap();
    drop(queue);
    let audit = AuditLog::open(dir.path().join("audit.jsonl")).await.unwrap();
    assert!(!audit.contains("z1").await);
    drop(audit);

    let h = Harness::in_dir(dir, FakeSource::with_items(Vec::new()), ScriptedBackend::new(), false).await;
    assert!(h.service.queue().contains("z1"));
    h.service
        .audit()
        .record(&AuditRecord {
            item_id: "z1".into(),
            verdict: VerdictKind::NoAct,
            action_taken: false,
            timestamp: common::t0(),
            provider: "scripted".into(),
            latency_ms: 1,
            reasoning: String::new(),
            attempts: 0,
            author: None,
            permalink: None,
            usage: None,
        })
        .await
        .unwrap();
    let step = h
        .service
        .pipeline()
        .process_next(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(step, Step::AlreadyAudited);
    assert!(h.service.queue().is_empty());
}

/// Test 4: corrupt state refuses to start.
#[tokio::test]
async fn corrupt_state_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("checkpoint.json"), "not json").unwrap();
    let config = common::test_config(&dir, true);
    let result = ModerationService::open(
        &config,
        FakeSource::with_items(Vec::new()),
        ScriptedBackend::new(),
        Arc::new(ManualClock::new(common::t0())),
        EventBus::new(),
    )
    .await;
    assert!(matches!(
        result.err(),
        Some(modsentry_core::PipelineError::Persistence(
            modsentry_core::PersistenceError::Corrupt { .. }
        ))
    ));
    // The checkpoint reader reports the same.
    assert!(CheckpointStore::read(&dir.path().join("checkpoint.json")).is_err());
}

/// Test 5: the service runs both tasks until cancelled.
#[tokio::test]
async fn service_runs_until_cancelled() {
    let source = FakeSource::with_items(vec![
        item_at("v1", "spam", 1),
        item_at("v2", "fine", 2),
        item_at("v3", "also fine", 3),
    ]);
    let mut h = Harness::new(source.clone(), false).await;
    let service = Arc::new(h.service);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while service.audit().stats().await.processed < 3 {
        assert!(tokio::time::Instant::now() < deadline, "pipeline did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    task.await.unwrap().unwrap();

    assert!(source.is_removed("v1"));
    let mut events = Vec::new();
    while let Ok(ev) = h.events.try_recv() {
        events.push(ev);
    }
    assert!(matches!(
        events.first(),
        Some(PipelineEvent::ServiceStarted { safe_mode: false, .. })
    ));
    assert_eq!(events.last(), Some(&PipelineEvent::ServiceStopped));
}

/// Test 6: a misconfigured backend aborts startup before any task runs.
#[tokio::test]
async fn fatal_health_check_aborts_run() {
    let source = FakeSource::with_items(vec![item_at("u1", "spam", 1)]);
    let h = Harness::new(source.clone(), false).await;
    h.backend
        .unhealthy(BackendError::FatalConfig("model 'x' not found".into()));

    let err = h.service.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, modsentry_core::PipelineError::Backend(_)));
    assert_eq!(source.list_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

/// Test 7: an unreachable backend at startup is only a warning.
#[tokio::test]
async fn unavailable_health_check_continues() {
    let h = Harness::new(FakeSource::with_items(Vec::new()), true).await;
    h.backend.unhealthy(unavailable());
    h.service.check_backend().await.unwrap();
}
