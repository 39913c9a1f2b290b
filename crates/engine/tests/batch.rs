//! Batch fan-out: whole-selection admission, per-item isolation, tile
//! mirroring, and aggregate reporting.

mod common;

use assert_matches::assert_matches;

use common::*;
use stagex_core::profile::PlanTier;
use stagex_core::status::{BatchItemStatus, JobStatus};
use stagex_engine::{NotificationLevel, SubmitError};

// ---------------------------------------------------------------------------
// Test: usage=9 on basic(10), batch of 3 -> rejected whole, zero side
// effects
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn batch_over_quota_is_rejected_whole() {
    let ctx = TestContext::new(PlanTier::Basic, 9);
    let engine = ctx.engine().await;

    engine
        .batch()
        .select(vec![
            png_asset("a.png"),
            png_asset("b.png"),
            png_asset("c.png"),
        ])
        .await;

    let err = engine.batch().submit(&staging_request()).await.unwrap_err();
    let denied = assert_matches!(err, SubmitError::Quota(denied) => denied);
    assert_eq!(denied.requested, 3);

    // Zero jobs created, zero storage writes attempted, items untouched.
    assert_eq!(ctx.store.len().await, 0);
    assert_eq!(ctx.storage.put_count(), 0);
    assert!(engine
        .batch()
        .items()
        .await
        .iter()
        .all(|i| i.status == BatchItemStatus::Pending));
}

// ---------------------------------------------------------------------------
// Test: one item failing both upload paths leaves N-1 dispatched and
// the siblings unaffected
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failing_item_does_not_disturb_siblings() {
    let ctx = TestContext::new(PlanTier::Trial, 0);
    // Storage down: healthy items fall back to inline references;
    // the unencodable one has no fallback left and fails.
    ctx.storage.set_failing(true);
    let engine = ctx.engine().await;
    let mut notifications = engine.notifications();

    let ids = engine
        .batch()
        .select(vec![
            png_asset("a.png"),
            unencodable_asset("b.png"),
            png_asset("c.png"),
        ])
        .await;

    let started = engine.batch().submit(&staging_request()).await.unwrap();
    assert_eq!(started, 2);
    assert_eq!(ctx.store.len().await, 2);

    let items = engine.batch().items().await;
    let failed: Vec<_> = items
        .iter()
        .filter(|i| i.status == BatchItemStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, ids[1]);
    assert!(failed[0].error.as_deref().unwrap().contains("b.png"));
    assert!(failed[0].job_id.is_none());

    for sibling in items.iter().filter(|i| i.id != ids[1]) {
        assert_eq!(sibling.status, BatchItemStatus::Queued);
        assert!(sibling.job_id.is_some());
    }

    // One aggregate report, warning-level for the partial start.
    let aggregate = notifications.recv().await.unwrap();
    assert_eq!(aggregate.level, NotificationLevel::Warning);
    assert!(aggregate.message.contains("2 of 3"));
}

// ---------------------------------------------------------------------------
// Test: full batch success -- aggregate notification only, tiles mirror
// the jobs to completion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn batch_completion_is_reported_in_aggregate_only() {
    let ctx = TestContext::new(PlanTier::Standard, 0);
    let engine = ctx.engine().await;
    let mut notifications = engine.notifications();

    engine
        .batch()
        .select(vec![
            png_asset("a.png"),
            png_asset("b.png"),
            png_asset("c.png"),
        ])
        .await;

    let started = engine.batch().submit(&staging_request()).await.unwrap();
    assert_eq!(started, 3);

    let aggregate = notifications.recv().await.unwrap();
    assert_eq!(aggregate.level, NotificationLevel::Success);
    assert!(aggregate.message.contains("3 of 3"));

    // Drive every job to completed through the push channel.
    let items = engine.batch().items().await;
    for item in &items {
        let job_id = item.job_id.expect("dispatched item has a job");
        ctx.store
            .push_update(job_id, JobStatus::Completed, Some("https://cdn.example/out.png"))
            .await;
        wait_for_status(&engine, job_id, JobStatus::Completed).await;
    }
    settle().await;

    assert_eq!(engine.batch().completed_count().await, 3);
    assert!(engine
        .batch()
        .items()
        .await
        .iter()
        .all(|i| i.status == BatchItemStatus::Completed));

    // Per-item terminal notifications are suppressed for batch jobs.
    while let Ok(n) = notifications.try_recv() {
        assert!(
            !n.message.contains("Image generation completed"),
            "unexpected per-item notification: {}",
            n.message
        );
    }

    // Each completed item refreshed the quota record.
    assert_eq!(ctx.profiles.fetches(), 4);
}

// ---------------------------------------------------------------------------
// Test: pre-dispatch removal and clearing the session
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn pending_items_can_be_removed_until_dispatch() {
    let ctx = TestContext::new(PlanTier::Standard, 0);
    let engine = ctx.engine().await;

    let ids = engine
        .batch()
        .select(vec![png_asset("a.png"), png_asset("b.png")])
        .await;

    // Deselecting a pending item discards it with no side effects.
    assert!(engine.batch().remove(ids[0]).await);
    assert!(!engine.batch().remove(ids[0]).await);
    assert_eq!(engine.batch().items().await.len(), 1);

    let started = engine.batch().submit(&staging_request()).await.unwrap();
    assert_eq!(started, 1);
    assert_eq!(ctx.store.len().await, 1);

    // Once dispatched, the item is no longer removable.
    assert!(!engine.batch().remove(ids[1]).await);

    // Clearing ends the session; the jobs live on in the view.
    engine.batch().clear().await;
    assert!(engine.batch().items().await.is_empty());
    assert_eq!(engine.jobs().await.len(), 1);
}

// ---------------------------------------------------------------------------
// Test: a dispatch refusal marks only its own item failed
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dispatch_refusal_is_isolated_to_its_item() {
    let ctx = TestContext::new(PlanTier::Standard, 0);
    ctx.worker.set_refusing(true);
    let engine = ctx.engine().await;

    engine.batch().select(vec![png_asset("a.png")]).await;
    let started = engine.batch().submit(&staging_request()).await.unwrap();
    assert_eq!(started, 0);

    let items = engine.batch().items().await;
    assert_eq!(items[0].status, BatchItemStatus::Failed);
    let job_id = items[0].job_id.expect("the row was created before the refusal");
    assert_eq!(ctx.store.get(job_id).await.unwrap().status, JobStatus::Failed);

    // No poll loop for a job that never started.
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    assert_eq!(ctx.store.fetches(job_id).await, 0);
}
