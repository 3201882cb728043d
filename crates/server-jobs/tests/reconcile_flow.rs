//! Sweep followed by sync against a mock system of record.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use questline_core::{Aspect, AspectRates, Session};
use questline_db::Database;
use questline_server_jobs::{HttpSyncPush, RetryPolicy, StaleSweep, SyncReconciler};
use tokio_util::sync::CancellationToken;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[tokio::test]
async fn test_abandoned_session_is_closed_then_synced_once() {
    let db = Database::new_in_memory().await.unwrap();
    db.insert_session(&Session::new_live(
        "sess-abandoned",
        "user-7",
        t(0),
        AspectRates::default().with(Aspect::Energy, 0.5),
    ))
    .await
    .unwrap();
    db.pause_session("sess-abandoned", t(100)).await.unwrap();

    let mut server = mockito::Server::new_async().await;
    let ingest = server
        .mock("POST", "/api/sessions/sync")
        .match_header("idempotency-key", "sess-abandoned")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "sessionId": "sess-abandoned",
            "completedReason": "abandoned",
            "interruptionReason": "heartbeat_timeout",
            "focusedDurationSeconds": 100.0,
            "xpTotal": 50,
        })))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let cancel = CancellationToken::new();
    let sweep = StaleSweep::new(db.clone(), Duration::from_secs(300));
    let swept = sweep.run(t(1_000), &cancel).await.unwrap();
    assert_eq!(swept.closed, 1);

    let push = HttpSyncPush::new(
        format!("{}/api/sessions/sync", server.url()),
        Duration::from_secs(5),
    )
    .unwrap();
    let sync = SyncReconciler::new(db.clone(), push, RetryPolicy::default());
    let first = sync.sync_pending(t(1_010), &cancel).await.unwrap();
    assert_eq!(first.succeeded, 1);
    let second = sync.sync_pending(t(1_020), &cancel).await.unwrap();
    assert_eq!(second.attempted, 0);

    ingest.assert_async().await;
    let stored = db.get_session("sess-abandoned").await.unwrap().unwrap();
    assert!(stored.synced_to_django);
    assert_eq!(stored.last_synced_at, Some(t(1_010)));
}
