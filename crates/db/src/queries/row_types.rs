// crates/db/src/queries/row_types.rs
// Internal row type for the sessions table and column codecs.

use crate::{DbError, DbResult};
use chrono::{DateTime, Utc};
use questline_core::{CompletedReason, Session, SessionStatus};
use sqlx::Row;

/// Column list shared by every session SELECT.
pub(crate) const SESSION_COLUMNS: &str = r#"
    id, user_id, status, started_at, last_heartbeat_at, ended_at,
    pause_intervals, rate_segments,
    total_duration_seconds, focused_duration_seconds, xp_total, xp_breakdown,
    completed_reason, interruption_reason,
    synced_to_django, last_synced_at, revision
"#;

#[derive(Debug)]
pub(crate) struct SessionRow {
    id: String,
    user_id: String,
    status: String,
    started_at: i64,
    last_heartbeat_at: i64,
    ended_at: Option<i64>,
    pause_intervals: String,
    rate_segments: String,
    total_duration_seconds: Option<f64>,
    focused_duration_seconds: Option<f64>,
    xp_total: Option<i64>,
    xp_breakdown: Option<String>,
    completed_reason: Option<String>,
    interruption_reason: Option<String>,
    synced_to_django: bool,
    last_synced_at: Option<i64>,
    revision: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for SessionRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            last_heartbeat_at: row.try_get("last_heartbeat_at")?,
            ended_at: row.try_get("ended_at")?,
            pause_intervals: row.try_get("pause_intervals")?,
            rate_segments: row.try_get("rate_segments")?,
            total_duration_seconds: row.try_get("total_duration_seconds")?,
            focused_duration_seconds: row.try_get("focused_duration_seconds")?,
            xp_total: row.try_get("xp_total")?,
            xp_breakdown: row.try_get("xp_breakdown")?,
            completed_reason: row.try_get("completed_reason")?,
            interruption_reason: row.try_get("interruption_reason")?,
            synced_to_django: row.try_get("synced_to_django")?,
            last_synced_at: row.try_get("last_synced_at")?,
            revision: row.try_get("revision")?,
        })
    }
}

impl SessionRow {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn into_session(self) -> DbResult<Session> {
        let invalid = |reason: String| DbError::InvalidRecord {
            id: self.id.clone(),
            reason,
        };

        let status = SessionStatus::from_db_str(&self.status)
            .ok_or_else(|| invalid(format!("unknown status '{}'", self.status)))?;
        let completed_reason = match self.completed_reason.as_deref() {
            Some(raw) => Some(
                CompletedReason::from_db_str(raw)
                    .ok_or_else(|| invalid(format!("unknown completed_reason '{raw}'")))?,
            ),
            None => None,
        };
        let pause_intervals = serde_json::from_str(&self.pause_intervals)
            .map_err(|e| invalid(format!("pause_intervals: {e}")))?;
        let rate_segments = serde_json::from_str(&self.rate_segments)
            .map_err(|e| invalid(format!("rate_segments: {e}")))?;
        let xp_breakdown = match self.xp_breakdown.as_deref() {
            Some(raw) => Some(
                serde_json::from_str(raw).map_err(|e| invalid(format!("xp_breakdown: {e}")))?,
            ),
            None => None,
        };

        let ended_at = optional_millis(&self.id, "ended_at", self.ended_at);
        let last_synced_at = optional_millis(&self.id, "last_synced_at", self.last_synced_at);

        Ok(Session {
            started_at: from_millis(self.started_at).ok_or_else(|| invalid("started_at".into()))?,
            last_heartbeat_at: from_millis(self.last_heartbeat_at)
                .ok_or_else(|| invalid("last_heartbeat_at".into()))?,
            ended_at,
            last_synced_at,
            id: self.id,
            user_id: self.user_id,
            status,
            pause_intervals,
            rate_segments,
            total_duration_seconds: self.total_duration_seconds,
            focused_duration_seconds: self.focused_duration_seconds,
            xp_total: self.xp_total,
            xp_breakdown,
            completed_reason,
            interruption_reason: self.interruption_reason,
            synced_to_django: self.synced_to_django,
            revision: self.revision,
        })
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Optional timestamps decode to `None` when out of range; the row stays usable.
fn optional_millis(id: &str, column: &'static str, ms: Option<i64>) -> Option<DateTime<Utc>> {
    let ms = ms?;
    let decoded = from_millis(ms);
    if decoded.is_none() {
        tracing::warn!(session_id = %id, column, value = ms, "Dropping out-of-range timestamp");
    }
    decoded
}

/// Decode rows, skipping (and logging) any that no longer parse so one bad
/// record cannot stall a whole job run.
pub(crate) fn decode_rows(rows: Vec<SessionRow>) -> Vec<Session> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id().to_string();
            match row.into_session() {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Skipping undecodable session row");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_row(ended_at: Option<i64>, last_synced_at: Option<i64>) -> SessionRow {
        SessionRow {
            id: "s-1".into(),
            user_id: "u-1".into(),
            status: "completed".into(),
            started_at: 1_700_000_000_000,
            last_heartbeat_at: 1_700_000_060_000,
            ended_at,
            pause_intervals: "[]".into(),
            rate_segments: "[]".into(),
            total_duration_seconds: Some(60.0),
            focused_duration_seconds: Some(60.0),
            xp_total: Some(0),
            xp_breakdown: None,
            completed_reason: Some("explicit".into()),
            interruption_reason: None,
            synced_to_django: false,
            last_synced_at,
            revision: 1,
        }
    }

    #[test]
    fn test_out_of_range_optional_timestamps_decode_as_none() {
        let session = completed_row(Some(i64::MAX), Some(i64::MIN))
            .into_session()
            .unwrap();
        assert_eq!(session.id, "s-1");
        assert!(session.ended_at.is_none());
        assert!(session.last_synced_at.is_none());
    }

    #[test]
    fn test_valid_optional_timestamps_round_trip() {
        let session = completed_row(Some(1_700_000_060_000), None)
            .into_session()
            .unwrap();
        assert_eq!(session.ended_at.map(to_millis), Some(1_700_000_060_000));
        assert!(session.last_synced_at.is_none());
    }

    #[test]
    fn test_out_of_range_start_rejects_row() {
        let mut row = completed_row(None, None);
        row.started_at = i64::MAX;
        assert!(matches!(row.into_session(), Err(DbError::InvalidRecord { .. })));
    }
}
