// crates/db/src/queries/sessions.rs
// Session lifecycle operations: create, heartbeat, pause/resume, rate
// segments, conditional completion, and the sync flag.

use crate::store::{CompletionPatch, PatchOutcome};
use crate::{Database, DbError, DbResult};
use chrono::{DateTime, Utc};
use questline_core::{
    accounting, AspectRates, PauseInterval, RateSegment, Session, SessionStatus, ValidationError,
};

use super::row_types::{decode_rows, to_millis, SessionRow, SESSION_COLUMNS};

/// Session totals for the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounts {
    pub live: i64,
    pub completed: i64,
    pub unsynced: i64,
}

fn outcome(rows_affected: u64) -> PatchOutcome {
    if rows_affected == 1 {
        PatchOutcome::Applied
    } else {
        PatchOutcome::PreconditionFailed
    }
}

impl Database {
    /// Insert a new session as given (normally from [`Session::new_live`]).
    pub async fn insert_session(&self, session: &Session) -> DbResult<()> {
        let pause_intervals = serde_json::to_string(&session.pause_intervals)?;
        let rate_segments = serde_json::to_string(&session.rate_segments)?;
        let xp_breakdown = session
            .xp_breakdown
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, status, started_at, last_heartbeat_at, ended_at,
                pause_intervals, rate_segments,
                total_duration_seconds, focused_duration_seconds, xp_total, xp_breakdown,
                completed_reason, interruption_reason,
                synced_to_django, last_synced_at, revision
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8,
                ?9, ?10, ?11, ?12,
                ?13, ?14,
                ?15, ?16, ?17
            )
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.status.as_str())
        .bind(to_millis(session.started_at))
        .bind(to_millis(session.last_heartbeat_at))
        .bind(session.ended_at.map(to_millis))
        .bind(&pause_intervals)
        .bind(&rate_segments)
        .bind(session.total_duration_seconds)
        .bind(session.focused_duration_seconds)
        .bind(session.xp_total)
        .bind(&xp_breakdown)
        .bind(session.completed_reason.map(|r| r.as_str()))
        .bind(&session.interruption_reason)
        .bind(session.synced_to_django)
        .bind(session.last_synced_at.map(to_millis))
        .bind(session.revision)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Fetch a single session.
    pub async fn get_session(&self, id: &str) -> DbResult<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(SessionRow::into_session).transpose()
    }

    async fn require_session(&self, id: &str) -> DbResult<Session> {
        self.get_session(id)
            .await?
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    /// Live sessions whose last heartbeat is strictly before `heartbeat_before`.
    pub async fn list_stale_live(&self, heartbeat_before: DateTime<Utc>) -> DbResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE status = 'live' AND last_heartbeat_at < ?1
            ORDER BY last_heartbeat_at ASC, id ASC
            "#
        ))
        .bind(to_millis(heartbeat_before))
        .fetch_all(self.pool())
        .await?;
        Ok(decode_rows(rows))
    }

    /// Completed sessions the system of record has not acknowledged yet.
    pub async fn list_unsynced_completed(&self) -> DbResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE synced_to_django = 0 AND status = 'completed'
            ORDER BY ended_at ASC, id ASC
            "#
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(decode_rows(rows))
    }

    pub async fn session_counts(&self) -> DbResult<SessionCounts> {
        let (live, completed, unsynced): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'live' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'completed' AND synced_to_django = 0 THEN 1 ELSE 0 END), 0)
            FROM sessions
            "#,
        )
        .fetch_one(self.pool())
        .await?;
        Ok(SessionCounts {
            live,
            completed,
            unsynced,
        })
    }

    /// Liveness ping. Only lands while the session is Live.
    pub async fn record_heartbeat(&self, id: &str, at: DateTime<Utc>) -> DbResult<PatchOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET last_heartbeat_at = ?2, revision = revision + 1
            WHERE id = ?1 AND status = 'live'
            "#,
        )
        .bind(id)
        .bind(to_millis(at))
        .execute(self.pool())
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    /// Open a pause. No-op (`PreconditionFailed`) if one is already open.
    pub async fn pause_session(&self, id: &str, at: DateTime<Utc>) -> DbResult<PatchOutcome> {
        let session = self.require_session(id).await?;
        if !session.is_live() || session.open_pause().is_some() {
            return Ok(PatchOutcome::PreconditionFailed);
        }
        if let Some(last) = session.pause_intervals.last() {
            if at < last.paused_at {
                return Err(ValidationError::PausesOutOfOrder {
                    session_id: id.to_string(),
                    index: session.pause_intervals.len(),
                }
                .into());
            }
        }

        let mut pauses = session.pause_intervals.clone();
        pauses.push(PauseInterval::open(at));
        self.replace_pauses(&session, &pauses).await
    }

    /// Close the open pause. No-op if none is open.
    pub async fn resume_session(&self, id: &str, at: DateTime<Utc>) -> DbResult<PatchOutcome> {
        let session = self.require_session(id).await?;
        let Some(open) = session.open_pause().filter(|_| session.is_live()) else {
            return Ok(PatchOutcome::PreconditionFailed);
        };
        if at < open.paused_at {
            return Err(ValidationError::ResumeBeforePause {
                session_id: id.to_string(),
                index: session.pause_intervals.len() - 1,
            }
            .into());
        }

        let mut pauses = session.pause_intervals.clone();
        if let Some(last) = pauses.last_mut() {
            last.resumed_at = Some(at);
        }
        self.replace_pauses(&session, &pauses).await
    }

    async fn replace_pauses(
        &self,
        session: &Session,
        pauses: &[PauseInterval],
    ) -> DbResult<PatchOutcome> {
        let encoded = serde_json::to_string(pauses)?;
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET pause_intervals = ?3, revision = revision + 1
            WHERE id = ?1 AND status = 'live' AND revision = ?2
            "#,
        )
        .bind(&session.id)
        .bind(session.revision)
        .bind(&encoded)
        .execute(self.pool())
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    /// Append a rate change effective from `at_second` of focused time.
    ///
    /// Segments are append-only; `at_second` must be strictly after the
    /// current last segment.
    pub async fn append_rate_segment(
        &self,
        id: &str,
        at_second: f64,
        rates: AspectRates,
    ) -> DbResult<PatchOutcome> {
        let session = self.require_session(id).await?;
        if !session.is_live() {
            return Ok(PatchOutcome::PreconditionFailed);
        }

        let mut segments = session.rate_segments.clone();
        segments.push(RateSegment { at_second, rates });
        let mut candidate = session.clone();
        candidate.rate_segments = segments;
        // Reuse the accounting invariants; the reference time is irrelevant here.
        accounting::validate(&candidate, candidate.started_at.max(Utc::now()))?;

        let encoded = serde_json::to_string(&candidate.rate_segments)?;
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET rate_segments = ?3, revision = revision + 1
            WHERE id = ?1 AND status = 'live' AND revision = ?2
            "#,
        )
        .bind(&session.id)
        .bind(session.revision)
        .bind(&encoded)
        .execute(self.pool())
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    /// Transition a Live session to Completed in one statement.
    ///
    /// The write only lands if the session is still Live with the heartbeat
    /// and revision that were read; otherwise nothing changes.
    pub async fn complete_if_unchanged(&self, patch: &CompletionPatch) -> DbResult<PatchOutcome> {
        let pause_intervals = serde_json::to_string(&patch.pause_intervals)?;
        let xp_breakdown = serde_json::to_string(&patch.xp_breakdown)?;

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = ?4,
                ended_at = ?5,
                completed_reason = ?6,
                interruption_reason = ?7,
                pause_intervals = ?8,
                total_duration_seconds = ?9,
                focused_duration_seconds = ?10,
                xp_breakdown = ?11,
                xp_total = ?12,
                revision = revision + 1
            WHERE id = ?1
              AND status = 'live'
              AND last_heartbeat_at = ?2
              AND revision = ?3
            "#,
        )
        .bind(&patch.session_id)
        .bind(to_millis(patch.expected.last_heartbeat_at))
        .bind(patch.expected.revision)
        .bind(SessionStatus::Completed.as_str())
        .bind(to_millis(patch.ended_at))
        .bind(patch.reason.as_str())
        .bind(&patch.interruption_reason)
        .bind(&pause_intervals)
        .bind(patch.total_duration_seconds)
        .bind(patch.focused_duration_seconds)
        .bind(&xp_breakdown)
        .bind(patch.xp_total)
        .execute(self.pool())
        .await?;

        Ok(outcome(result.rows_affected()))
    }

    /// Player-initiated completion at `now`.
    ///
    /// Follows the same rules as the staleness sweep: validated snapshot,
    /// single conditional write, and a no-op once the session is Completed.
    pub async fn complete_session_explicit(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<PatchOutcome> {
        let session = self.require_session(id).await?;
        if !session.is_live() {
            return Ok(PatchOutcome::PreconditionFailed);
        }
        let rec = accounting::reconcile_checked(&session, now)?;
        self.complete_if_unchanged(&CompletionPatch::explicit(&session, now, rec))
            .await
    }

    /// Flip the sync flag after the system of record acknowledged the session.
    pub async fn mark_synced(&self, id: &str, synced_at: DateTime<Utc>) -> DbResult<PatchOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET synced_to_django = 1, last_synced_at = ?2, revision = revision + 1
            WHERE id = ?1 AND status = 'completed' AND synced_to_django = 0
            "#,
        )
        .bind(id)
        .bind(to_millis(synced_at))
        .execute(self.pool())
        .await?;
        Ok(outcome(result.rows_affected()))
    }
}
