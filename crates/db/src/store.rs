//! The store contract the reconciliation jobs run against.
//!
//! Both jobs only need two snapshot queries and two conditional patches.
//! [`Database`] is the production implementation; tests wrap it to inject
//! concurrent writes between a job's read and its patch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use questline_core::{
    CompletedReason, PauseInterval, Reconciliation, Session, XpBreakdown, HEARTBEAT_TIMEOUT,
};

use crate::{Database, DbResult};

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The precondition held and every field was written.
    Applied,
    /// The record changed (or vanished) since it was read; nothing was written.
    PreconditionFailed,
}

impl PatchOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, PatchOutcome::Applied)
    }
}

/// What must still be true of a Live session for a completion to land.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePrecondition {
    pub last_heartbeat_at: DateTime<Utc>,
    pub revision: i64,
}

impl LivePrecondition {
    pub fn of(session: &Session) -> Self {
        Self {
            last_heartbeat_at: session.last_heartbeat_at,
            revision: session.revision,
        }
    }
}

/// All-or-nothing transition of a Live session to Completed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPatch {
    pub session_id: String,
    pub expected: LivePrecondition,
    pub ended_at: DateTime<Utc>,
    pub reason: CompletedReason,
    pub interruption_reason: Option<String>,
    pub pause_intervals: Vec<PauseInterval>,
    pub total_duration_seconds: f64,
    pub focused_duration_seconds: f64,
    pub xp_breakdown: XpBreakdown,
    pub xp_total: i64,
}

impl CompletionPatch {
    fn new(
        session: &Session,
        now: DateTime<Utc>,
        reason: CompletedReason,
        interruption_reason: Option<String>,
        rec: Reconciliation,
    ) -> Self {
        Self {
            session_id: session.id.clone(),
            expected: LivePrecondition::of(session),
            ended_at: now,
            reason,
            interruption_reason,
            pause_intervals: rec.pause_intervals,
            total_duration_seconds: rec.total_duration_seconds,
            focused_duration_seconds: rec.focused_duration_seconds,
            xp_breakdown: rec.xp_breakdown,
            xp_total: rec.xp_total,
        }
    }

    /// Closure by the staleness sweep.
    pub fn abandoned(session: &Session, now: DateTime<Utc>, rec: Reconciliation) -> Self {
        Self::new(
            session,
            now,
            CompletedReason::Abandoned,
            Some(HEARTBEAT_TIMEOUT.to_string()),
            rec,
        )
    }

    /// Closure requested by the player.
    pub fn explicit(session: &Session, now: DateTime<Utc>, rec: Reconciliation) -> Self {
        Self::new(session, now, CompletedReason::Explicit, None, rec)
    }
}

/// Session Record Store as seen by the periodic jobs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Live sessions whose heartbeat is strictly older than `heartbeat_before`.
    async fn list_stale_live(&self, heartbeat_before: DateTime<Utc>) -> DbResult<Vec<Session>>;

    /// Completed sessions not yet acknowledged by the system of record.
    async fn list_unsynced_completed(&self) -> DbResult<Vec<Session>>;

    /// Complete a session if it is still Live and unchanged since it was read.
    async fn complete_if_unchanged(&self, patch: &CompletionPatch) -> DbResult<PatchOutcome>;

    /// Flag a completed session as synced. Only applies while unsynced.
    async fn mark_synced(&self, session_id: &str, synced_at: DateTime<Utc>)
        -> DbResult<PatchOutcome>;
}

#[async_trait]
impl SessionStore for Database {
    async fn list_stale_live(&self, heartbeat_before: DateTime<Utc>) -> DbResult<Vec<Session>> {
        Database::list_stale_live(self, heartbeat_before).await
    }

    async fn list_unsynced_completed(&self) -> DbResult<Vec<Session>> {
        Database::list_unsynced_completed(self).await
    }

    async fn complete_if_unchanged(&self, patch: &CompletionPatch) -> DbResult<PatchOutcome> {
        Database::complete_if_unchanged(self, patch).await
    }

    async fn mark_synced(
        &self,
        session_id: &str,
        synced_at: DateTime<Utc>,
    ) -> DbResult<PatchOutcome> {
        Database::mark_synced(self, session_id, synced_at).await
    }
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for std::sync::Arc<T> {
    async fn list_stale_live(&self, heartbeat_before: DateTime<Utc>) -> DbResult<Vec<Session>> {
        (**self).list_stale_live(heartbeat_before).await
    }

    async fn list_unsynced_completed(&self) -> DbResult<Vec<Session>> {
        (**self).list_unsynced_completed().await
    }

    async fn complete_if_unchanged(&self, patch: &CompletionPatch) -> DbResult<PatchOutcome> {
        (**self).complete_if_unchanged(patch).await
    }

    async fn mark_synced(
        &self,
        session_id: &str,
        synced_at: DateTime<Utc>,
    ) -> DbResult<PatchOutcome> {
        (**self).mark_synced(session_id, synced_at).await
    }
}
