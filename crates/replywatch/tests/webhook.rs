//! Notification ingestion: HTTP intake, queueing, and per-item processing.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tower::ServiceExt;

use common::{
    created_notification, MessageBuilder, TestHarness, TrackedEmailBuilder, CLIENT_STATE, USER,
};
use replywatch::subscription::{SubscriptionStatus, SubscriptionStore};
use replywatch::tracking::{DetectionMethod, TrackedEmail, TrackingStatus};
use replywatch::webhook::{build_router, AppState, NotificationBatch, QueueDispatcher};

fn batch(items: Vec<serde_json::Value>) -> NotificationBatch {
    serde_json::from_value(json!({ "value": items })).unwrap()
}

/// A tracked email in `conv-1` with a reply already in the thread.
fn seed_thread(h: &TestHarness) -> (TrackedEmail, DateTime<Utc>) {
    let t0 = Utc::now().trunc_subsecs(0) - Duration::hours(1);
    let email = h.track(
        TrackedEmailBuilder::new("Proposal")
            .conversation("conv-1")
            .provider_message_id("orig-1")
            .sent_at(t0)
            .build(),
    );
    h.provider.add_conversation(
        "conv-1",
        vec![
            MessageBuilder::new("orig-1", t0).conversation("conv-1").subject("Proposal").build(),
            MessageBuilder::new("reply-1", t0 + Duration::seconds(100))
                .conversation("conv-1")
                .subject("RE: Proposal")
                .build(),
        ],
    );
    (email, t0)
}

fn event_state(h: &TestHarness) -> Vec<(bool, u32, Option<String>)> {
    h.store
        .database()
        .with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT processed, retry_count, error_message FROM webhook_events ORDER BY received_at",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok((
                        r.get::<_, bool>(0)?,
                        r.get::<_, u32>(1)?,
                        r.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .unwrap()
}

#[tokio::test]
async fn test_created_notification_detects_reply() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let (email, t0) = seed_thread(&h);

    let report = h
        .processor()
        .process_batch(batch(vec![created_notification(
            "sub-1",
            CLIENT_STATE,
            "reply-1",
            Some("conv-1"),
        )]))
        .await;

    assert_eq!(report.received, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(report.replies_detected, 1);

    let stored = h.reload(&email);
    assert_eq!(stored.status, TrackingStatus::Replied);
    assert_eq!(stored.reply_received_at, Some(t0 + Duration::seconds(100)));
    assert_eq!(stored.detection_method, Some(DetectionMethod::ConversationId));
    assert_eq!(event_state(&h), vec![(true, 0, None)]);
}

#[tokio::test]
async fn test_client_state_mismatch_is_rejected_without_mutation() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let (email, _) = seed_thread(&h);

    let report = h
        .processor()
        .process_batch(batch(vec![created_notification(
            "sub-1",
            "forged-state",
            "reply-1",
            Some("conv-1"),
        )]))
        .await;

    assert_eq!(report.errors, 1);
    assert_eq!(report.processed, 0);
    assert_eq!(h.reload(&email).status, TrackingStatus::Pending);
    assert_eq!(h.provider.calls().list_conversation, 0);

    // Recorded as handled so it is never retried.
    let events = event_state(&h);
    assert_eq!(events.len(), 1);
    assert!(events[0].0);
    assert_eq!(events[0].1, 0);
    assert_eq!(events[0].2.as_deref(), Some("client state mismatch"));
}

#[tokio::test]
async fn test_thin_notification_is_hydrated() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let (email, _) = seed_thread(&h);

    let report = h
        .processor()
        .process_batch(batch(vec![created_notification(
            "sub-1",
            CLIENT_STATE,
            "reply-1",
            None,
        )]))
        .await;

    assert_eq!(report.replies_detected, 1);
    assert_eq!(h.provider.calls().get_message, 1);
    assert_eq!(h.reload(&email).status, TrackingStatus::Replied);
}

#[tokio::test]
async fn test_subject_fallback_when_no_conversation_id() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let now = Utc::now().trunc_subsecs(0);
    let email = h.track(
        TrackedEmailBuilder::new("Budget")
            .sent_at(now - Duration::hours(2))
            .build(),
    );
    h.provider.set_search_results(vec![MessageBuilder::new("r-1", now - Duration::minutes(5))
        .subject("RE: Budget")
        .build()]);

    let mut item = created_notification("sub-1", CLIENT_STATE, "r-1", None);
    item["resourceData"]["subject"] = json!("RE: Budget");

    let report = h.processor().process_batch(batch(vec![item])).await;

    assert_eq!(report.replies_detected, 1);
    assert_eq!(h.provider.calls().get_message, 0);
    let stored = h.reload(&email);
    assert_eq!(stored.status, TrackingStatus::Replied);
    assert_eq!(stored.detection_method, Some(DetectionMethod::SubjectMatching));
}

#[tokio::test]
async fn test_read_state_update_is_logged_only() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");

    let item = json!({
        "subscriptionId": "sub-1",
        "clientState": CLIENT_STATE,
        "changeType": "updated",
        "resourceData": { "id": "m-1", "isRead": true }
    });
    let report = h.processor().process_batch(batch(vec![item])).await;

    assert_eq!(report.processed, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(h.provider.calls().total(), 0);
    assert_eq!(h.event_count(), 1);
}

#[tokio::test]
async fn test_bad_items_do_not_block_siblings() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let (email, _) = seed_thread(&h);

    let report = h
        .processor()
        .process_batch(batch(vec![
            json!({ "changeType": "created" }),
            created_notification("sub-unknown", CLIENT_STATE, "x", Some("conv-x")),
            created_notification("sub-1", CLIENT_STATE, "reply-1", Some("conv-1")),
        ]))
        .await;

    assert_eq!(report.received, 3);
    assert_eq!(report.processed, 1);
    assert_eq!(report.errors, 2);
    assert_eq!(h.event_count(), 3);
    assert_eq!(h.events_with_errors(), 2);
    assert_eq!(h.reload(&email).status, TrackingStatus::Replied);
}

#[tokio::test]
async fn test_wrong_typed_item_is_quarantined_beside_valid_sibling() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let (email, _) = seed_thread(&h);

    let mut wrong_type = created_notification("sub-1", CLIENT_STATE, "reply-1", Some("conv-1"));
    wrong_type["changeType"] = json!(7);
    let body = json!({
        "value": [
            wrong_type,
            created_notification("sub-1", CLIENT_STATE, "reply-1", Some("conv-1")),
        ]
    });
    let batch: NotificationBatch = serde_json::from_value(body).unwrap();

    let report = h.processor().process_batch(batch).await;

    assert_eq!(report.received, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(h.event_count(), 2);
    assert_eq!(h.events_with_errors(), 1);
    assert_eq!(h.reload(&email).status, TrackingStatus::Replied);
}

#[tokio::test]
async fn test_processing_failure_increments_retry_count() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let (email, _) = seed_thread(&h);
    h.provider.fail_conversation_lookups(true);

    let report = h
        .processor()
        .process_batch(batch(vec![created_notification(
            "sub-1",
            CLIENT_STATE,
            "reply-1",
            Some("conv-1"),
        )]))
        .await;

    assert_eq!(report.errors, 1);
    assert_eq!(h.reload(&email).status, TrackingStatus::Pending);
    let events = event_state(&h);
    assert!(!events[0].0);
    assert_eq!(events[0].1, 1);
    assert!(events[0]
        .2
        .as_deref()
        .is_some_and(|e| e.starts_with("provider temporarily unavailable")));
}

#[tokio::test]
async fn test_missed_lifecycle_triggers_reconciliation() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let (trigger_tx, mut trigger_rx) = broadcast::channel(4);
    let processor = h.processor().with_reconcile_trigger(trigger_tx);

    let item = json!({
        "subscriptionId": "sub-1",
        "clientState": CLIENT_STATE,
        "lifecycleEvent": "missed"
    });
    let report = processor.process_batch(batch(vec![item])).await;

    assert_eq!(report.processed, 1);
    assert!(trigger_rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_subscription_removed_lifecycle_recreates() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let processor = h.processor().with_subscription_manager(h.manager());

    let item = json!({
        "subscriptionId": "sub-1",
        "clientState": CLIENT_STATE,
        "lifecycleEvent": "subscriptionRemoved"
    });
    let report = processor.process_batch(batch(vec![item])).await;

    assert_eq!(report.processed, 1);
    assert_eq!(
        h.store.subscription("sub-1").unwrap().unwrap().status,
        SubscriptionStatus::Failed
    );
    let active = h.store.active_subscription(USER).unwrap().unwrap();
    assert_ne!(active.id, "sub-1");
    assert_eq!(active.id, "graph-sub-1");
}

#[tokio::test]
async fn test_endpoint_accepts_then_processes_in_background() {
    let h = TestHarness::new();
    h.seed_healthy_subscription("sub-1");
    let (email, _) = seed_thread(&h);

    let (dispatcher, _worker) = QueueDispatcher::start(Arc::new(h.processor()), 8);
    let app = build_router(AppState::new(Arc::new(dispatcher), "outlook"));

    let body = json!({
        "value": [
            created_notification("sub-1", CLIENT_STATE, "reply-1", Some("conv-1")),
            created_notification("sub-1", "forged", "reply-1", Some("conv-1")),
        ]
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/outlook")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], br#"{"message":"accepted"}"#);

    let mut replied = false;
    for _ in 0..100 {
        if h.event_count() == 2 && h.reload(&email).status == TrackingStatus::Replied {
            replied = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert!(replied, "notification was not processed in the background");
}

#[tokio::test]
async fn test_validation_handshake_echoes_token() {
    let h = TestHarness::new();
    let (dispatcher, _worker) = QueueDispatcher::start(Arc::new(h.processor()), 8);
    let app = build_router(AppState::new(Arc::new(dispatcher), "outlook"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/webhooks/outlook?validationToken=abc123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"abc123");
    assert_eq!(h.event_count(), 0);
}
