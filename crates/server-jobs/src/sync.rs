// crates/server-jobs/src/sync.rs
//! Pushes completed, unsynced sessions to the system of record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use questline_core::config::SyncConfig;
use questline_core::{Session, SyncPayload};
use questline_db::{PatchOutcome, SessionStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::push::{PushError, SyncPush};
use crate::scheduler::ScheduledJob;
use crate::state::JobState;
use crate::types::JobOutcome;

/// Bounds on push attempts within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per session, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Push attempts allowed across the whole run.
    pub attempt_budget: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_budget: config.attempt_budget.max(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given `attempt` already failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Tally of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Completed, unsynced sessions found.
    pub candidates: usize,
    /// Sessions for which at least one push was attempted.
    pub attempted: usize,
    /// Sessions acknowledged and flagged as synced.
    pub succeeded: usize,
    /// Sessions that stay unsynced after this run.
    pub failed: usize,
    /// Sessions left for the next run once the attempt budget ran out or the
    /// run was cancelled.
    pub deferred: usize,
    /// Total push attempts.
    pub pushes: u32,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "synced {} of {} sessions ({} failed, {} deferred, {} pushes)",
            self.succeeded, self.attempted, self.failed, self.deferred, self.pushes
        )
    }
}

enum Delivery {
    Acknowledged,
    GaveUp(PushError),
    Cancelled,
}

/// Sync reconciliation over a [`SessionStore`] and a [`SyncPush`].
pub struct SyncReconciler<S, P> {
    store: S,
    push: P,
    policy: RetryPolicy,
}

impl<S: SessionStore, P: SyncPush> SyncReconciler<S, P> {
    pub fn new(store: S, push: P, policy: RetryPolicy) -> Self {
        Self {
            store,
            push,
            policy,
        }
    }

    /// Push every completed, unsynced session and flag the acknowledged ones.
    ///
    /// The synced flag is only set after an acknowledgement, and only while
    /// the record is still completed and unsynced. A failed push leaves the
    /// record as it was for the next run.
    pub async fn sync_pending(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> questline_db::DbResult<SyncReport> {
        self.sync_pending_with(now, cancel, |_| {}).await
    }

    /// [`SyncReconciler::sync_pending`] with a callback after each candidate.
    pub async fn sync_pending_with(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        mut on_candidate: impl FnMut(&SyncReport) + Send,
    ) -> questline_db::DbResult<SyncReport> {
        let candidates = self.store.list_unsynced_completed().await?;
        let total = candidates.len();
        let mut report = SyncReport {
            candidates: total,
            ..SyncReport::default()
        };
        tracing::debug!(candidates = total, "Sync run started");

        for (index, session) in candidates.iter().enumerate() {
            if cancel.is_cancelled() || report.pushes >= self.policy.attempt_budget {
                report.deferred = total - index;
                tracing::info!(
                    deferred = report.deferred,
                    cancelled = cancel.is_cancelled(),
                    "Sync run stopped early, remaining sessions deferred"
                );
                break;
            }

            let Some(payload) = SyncPayload::from_session(session) else {
                report.failed += 1;
                tracing::warn!(session_id = %session.id, "Completed session is missing derived fields, not pushing");
                metrics::counter!("questline_sync_sessions_total", "outcome" => "invalid").increment(1);
                on_candidate(&report);
                continue;
            };

            report.attempted += 1;
            match self.deliver(&payload, &mut report, cancel).await {
                Delivery::Acknowledged => self.flag_synced(session, now, &mut report).await,
                Delivery::GaveUp(e) => {
                    report.failed += 1;
                    tracing::warn!(session_id = %session.id, error = %e, "Sync push failed");
                    metrics::counter!("questline_sync_sessions_total", "outcome" => "failed").increment(1);
                }
                Delivery::Cancelled => {
                    report.failed += 1;
                    report.deferred = total - index - 1;
                    on_candidate(&report);
                    break;
                }
            }
            on_candidate(&report);
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            deferred = report.deferred,
            pushes = report.pushes,
            "Sync run finished"
        );
        Ok(report)
    }

    async fn deliver(
        &self,
        payload: &SyncPayload,
        report: &mut SyncReport,
        cancel: &CancellationToken,
    ) -> Delivery {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            report.pushes += 1;
            let err = match self.push.push(payload).await {
                Ok(()) => return Delivery::Acknowledged,
                Err(e) => e,
            };

            let exhausted = attempt >= self.policy.max_attempts
                || report.pushes >= self.policy.attempt_budget;
            if !err.is_retryable() || exhausted {
                return Delivery::GaveUp(err);
            }

            let delay = self.policy.backoff(attempt);
            tracing::debug!(
                session_id = %payload.session_id,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying sync push"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Delivery::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn flag_synced(&self, session: &Session, now: DateTime<Utc>, report: &mut SyncReport) {
        match self.store.mark_synced(&session.id, now).await {
            Ok(PatchOutcome::Applied) => {
                report.succeeded += 1;
                tracing::info!(session_id = %session.id, "Session synced");
                metrics::counter!("questline_sync_sessions_total", "outcome" => "synced").increment(1);
            }
            Ok(PatchOutcome::PreconditionFailed) => {
                // Another run flagged it first; the push was idempotent.
                report.succeeded += 1;
                tracing::debug!(session_id = %session.id, "Session already flagged as synced");
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(session_id = %session.id, error = %e, "Push acknowledged but flag update failed");
                metrics::counter!("questline_sync_sessions_total", "outcome" => "failed").increment(1);
            }
        }
    }
}

#[async_trait]
impl<S, P> ScheduledJob for SyncReconciler<S, P>
where
    S: SessionStore + 'static,
    P: SyncPush + 'static,
{
    fn job_type(&self) -> &'static str {
        "sync"
    }

    async fn execute(
        &self,
        state: Arc<JobState>,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, String> {
        let report = self
            .sync_pending_with(Utc::now(), &cancel, |r| {
                state.set_total(r.candidates as u64);
                state.increment();
            })
            .await
            .map_err(|e| e.to_string())?;
        if cancel.is_cancelled() && report.deferred > 0 {
            Ok(JobOutcome::Cancelled(report.summary()))
        } else {
            Ok(JobOutcome::Completed(report.summary()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use questline_core::{Aspect, AspectRates};
    use questline_db::Database;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    /// Replays scripted results per session; acknowledges once a script runs out.
    #[derive(Default)]
    struct ScriptedPush {
        scripts: Mutex<HashMap<String, VecDeque<Result<(), PushError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedPush {
        fn script(self, id: &str, results: Vec<Result<(), PushError>>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(id.to_string(), results.into());
            self
        }

        fn calls_for(&self, id: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == id).count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl<'a> SyncPush for &'a ScriptedPush {
        async fn push(&self, payload: &SyncPayload) -> Result<(), PushError> {
            self.calls.lock().unwrap().push(payload.session_id.clone());
            self.scripts
                .lock()
                .unwrap()
                .get_mut(&payload.session_id)
                .and_then(|q| q.pop_front())
                .unwrap_or(Ok(()))
        }
    }

    fn unavailable() -> Result<(), PushError> {
        Err(PushError::Rejected {
            status: 503,
            body: "maintenance".into(),
        })
    }

    fn policy(max_attempts: u32, attempt_budget: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            attempt_budget,
        }
    }

    async fn completed(db: &Database, id: &str, ended: i64) {
        db.insert_session(&Session::new_live(
            id,
            "user-1",
            t(0),
            AspectRates::default().with(Aspect::Logic, 1.0),
        ))
        .await
        .unwrap();
        db.complete_session_explicit(id, t(ended)).await.unwrap();
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            attempt_budget: 100,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_secs(1));
        assert_eq!(p.backoff(3), Duration::from_secs(2));
        assert_eq!(p.backoff(5), Duration::from_secs(8));
        assert_eq!(p.backoff(6), Duration::from_secs(8));
        assert_eq!(p.backoff(60), Duration::from_secs(8));
    }

    #[test]
    fn test_zero_limits_in_config_still_allow_one_push() {
        let config = SyncConfig {
            max_attempts: 0,
            attempt_budget: 0,
            ..SyncConfig::default()
        };
        let p = RetryPolicy::from(&config);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.attempt_budget, 1);
    }

    #[tokio::test]
    async fn test_sync_flags_acknowledged_sessions_once() {
        let db = Database::new_in_memory().await.unwrap();
        completed(&db, "a", 60).await;
        completed(&db, "b", 70).await;
        let push = ScriptedPush::default();

        let sync = SyncReconciler::new(db.clone(), &push, policy(3, 100));
        let first = sync.sync_pending(t(100), &CancellationToken::new()).await.unwrap();
        assert_eq!(first.attempted, 2);
        assert_eq!(first.succeeded, 2);

        let second = sync.sync_pending(t(200), &CancellationToken::new()).await.unwrap();
        assert_eq!(second, SyncReport::default());
        assert_eq!(push.total_calls(), 2);

        let a = db.get_session("a").await.unwrap().unwrap();
        assert!(a.synced_to_django);
        assert_eq!(a.last_synced_at, Some(t(100)));
    }

    #[tokio::test]
    async fn test_live_sessions_are_never_pushed() {
        let db = Database::new_in_memory().await.unwrap();
        db.insert_session(&Session::new_live("live", "u", t(0), AspectRates::default()))
            .await
            .unwrap();
        let push = ScriptedPush::default();

        let sync = SyncReconciler::new(db.clone(), &push, policy(3, 100));
        let report = sync.sync_pending(t(100), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(push.total_calls(), 0);
        assert!(!db.get_session("live").await.unwrap().unwrap().synced_to_django);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let db = Database::new_in_memory().await.unwrap();
        completed(&db, "a", 60).await;
        let push = ScriptedPush::default().script("a", vec![unavailable(), unavailable()]);

        let sync = SyncReconciler::new(db.clone(), &push, policy(3, 100));
        let report = sync.sync_pending(t(100), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.pushes, 3);
        assert_eq!(push.calls_for("a"), 3);
        assert!(db.get_session("a").await.unwrap().unwrap().synced_to_django);
    }

    #[tokio::test]
    async fn test_failure_leaves_record_untouched() {
        let db = Database::new_in_memory().await.unwrap();
        completed(&db, "a", 60).await;
        completed(&db, "b", 70).await;
        let before = db.get_session("a").await.unwrap().unwrap();
        let push = ScriptedPush::default().script("a", vec![unavailable(); 3]);

        let sync = SyncReconciler::new(db.clone(), &push, policy(3, 100));
        let report = sync.sync_pending(t(100), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(push.calls_for("a"), 3);
        assert_eq!(db.get_session("a").await.unwrap().unwrap(), before);
        assert!(db.get_session("b").await.unwrap().unwrap().synced_to_django);
    }

    #[tokio::test]
    async fn test_non_retryable_rejection_is_not_retried() {
        let db = Database::new_in_memory().await.unwrap();
        completed(&db, "a", 60).await;
        let push = ScriptedPush::default().script(
            "a",
            vec![Err(PushError::Rejected {
                status: 422,
                body: "bad payload".into(),
            })],
        );

        let sync = SyncReconciler::new(db.clone(), &push, policy(3, 100));
        let report = sync.sync_pending(t(100), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(push.calls_for("a"), 1);
    }

    #[tokio::test]
    async fn test_attempt_budget_defers_remaining_sessions() {
        let db = Database::new_in_memory().await.unwrap();
        completed(&db, "a", 10).await;
        completed(&db, "b", 20).await;
        completed(&db, "c", 30).await;
        let push = ScriptedPush::default().script("a", vec![unavailable(); 3]);

        let sync = SyncReconciler::new(db.clone(), &push, policy(3, 4));
        let report = sync.sync_pending(t(100), &CancellationToken::new()).await.unwrap();

        // a: 3 failed pushes; b: 1 push acknowledged; c: budget spent.
        assert_eq!(report.pushes, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(push.calls_for("c"), 0);
        assert!(!db.get_session("c").await.unwrap().unwrap().synced_to_django);

        // The next run picks up where this one stopped.
        let next = sync.sync_pending(t(200), &CancellationToken::new()).await.unwrap();
        assert_eq!(next.succeeded, 2);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_defers_rest() {
        let db = Database::new_in_memory().await.unwrap();
        completed(&db, "a", 10).await;
        completed(&db, "b", 20).await;
        let push = ScriptedPush::default().script("a", vec![unavailable(); 3]);

        let cancel = CancellationToken::new();
        let slow = RetryPolicy {
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
            ..policy(3, 100)
        };
        let sync = SyncReconciler::new(db.clone(), &push, slow);
        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };
        let report = sync.sync_pending(t(100), &cancel).await.unwrap();
        stopper.await.unwrap();

        assert_eq!(report.pushes, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(push.calls_for("b"), 0);
    }

    /// Fails every `mark_synced`, as if the database went read-only.
    struct ReadOnlyFlags(Database);

    #[async_trait]
    impl SessionStore for ReadOnlyFlags {
        async fn list_stale_live(&self, before: DateTime<Utc>) -> questline_db::DbResult<Vec<Session>> {
            self.0.list_stale_live(before).await
        }

        async fn list_unsynced_completed(&self) -> questline_db::DbResult<Vec<Session>> {
            self.0.list_unsynced_completed().await
        }

        async fn complete_if_unchanged(
            &self,
            patch: &questline_db::CompletionPatch,
        ) -> questline_db::DbResult<PatchOutcome> {
            self.0.complete_if_unchanged(patch).await
        }

        async fn mark_synced(&self, id: &str, _at: DateTime<Utc>) -> questline_db::DbResult<PatchOutcome> {
            Err(questline_db::DbError::NotFound(id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_flag_failure_counts_as_failed_and_retries_next_run() {
        let db = Database::new_in_memory().await.unwrap();
        completed(&db, "a", 60).await;
        let push = ScriptedPush::default();

        let sync = SyncReconciler::new(ReadOnlyFlags(db.clone()), &push, policy(3, 100));
        let report = sync.sync_pending(t(100), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 0);
        assert!(!db.get_session("a").await.unwrap().unwrap().synced_to_django);

        let healthy = SyncReconciler::new(db.clone(), &push, policy(3, 100));
        healthy.sync_pending(t(200), &CancellationToken::new()).await.unwrap();
        assert_eq!(push.calls_for("a"), 2);
        assert!(db.get_session("a").await.unwrap().unwrap().synced_to_django);
    }

    struct AlwaysAck;

    #[async_trait]
    impl SyncPush for AlwaysAck {
        async fn push(&self, _payload: &SyncPayload) -> Result<(), PushError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scheduled_run_reports_total_and_progress() {
        let db = Database::new_in_memory().await.unwrap();
        completed(&db, "a", 60).await;
        completed(&db, "b", 90).await;

        let runner = Arc::new(crate::JobRunner::new());
        let sync: Arc<dyn ScheduledJob> =
            Arc::new(SyncReconciler::new(db.clone(), AlwaysAck, policy(3, 100)));
        let trigger = crate::JobTrigger::new(sync, Arc::clone(&runner), CancellationToken::new());
        let handle = trigger.trigger().expect("run starts");
        let id = handle.id;
        handle.wait().await;

        let progress = runner.get_job(id).unwrap();
        assert_eq!(progress.job_type, "sync");
        assert_eq!(progress.status, "completed");
        assert_eq!(progress.total, 2);
        assert_eq!(progress.current, 2);
        assert!(progress.message.unwrap().starts_with("synced 2 of 2"));
    }
}
