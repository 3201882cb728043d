// crates/server-jobs/src/stale_sweep.rs
//! Closes Live sessions whose client stopped sending heartbeats.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use questline_core::accounting;
use questline_db::{CompletionPatch, PatchOutcome, SessionStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::scheduler::ScheduledJob;
use crate::state::JobState;
use crate::types::JobOutcome;

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Stale Live sessions found.
    pub candidates: usize,
    /// Sessions transitioned to Completed by this run.
    pub closed: usize,
    /// Sessions that changed between read and write and were left alone.
    pub conflicts: usize,
    /// Snapshots that violate accounting invariants.
    pub invalid: usize,
    /// Store errors on individual patches.
    pub failed: usize,
    /// Set when cancellation stopped the run before every candidate was seen.
    pub interrupted: bool,
}

impl SweepReport {
    pub fn summary(&self) -> String {
        format!(
            "closed {} of {} stale sessions ({} conflicts, {} invalid, {} failed)",
            self.closed, self.candidates, self.conflicts, self.invalid, self.failed
        )
    }
}

/// Staleness sweep over a [`SessionStore`].
pub struct StaleSweep<S> {
    store: S,
    threshold: Duration,
}

impl<S: SessionStore> StaleSweep<S> {
    pub fn new(store: S, threshold: Duration) -> Self {
        Self { store, threshold }
    }

    /// Close every Live session with no heartbeat since `now - threshold`.
    ///
    /// Each close is one conditional patch; a session that received a
    /// heartbeat or any other write after it was read is skipped. Errors on
    /// one session never stop the others. Only a failing candidate query
    /// fails the run.
    pub async fn run(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> questline_db::DbResult<SweepReport> {
        self.run_with(now, cancel, |_| {}).await
    }

    /// [`StaleSweep::run`] with a callback after each candidate is handled.
    pub async fn run_with(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        mut on_candidate: impl FnMut(&SweepReport) + Send,
    ) -> questline_db::DbResult<SweepReport> {
        let threshold = chrono::Duration::from_std(self.threshold)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now
            .checked_sub_signed(threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let candidates = self.store.list_stale_live(cutoff).await?;
        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };
        tracing::debug!(candidates = report.candidates, cutoff = %cutoff, "Stale sweep started");

        for session in candidates {
            if cancel.is_cancelled() {
                report.interrupted = true;
                tracing::info!(remaining = report.candidates - seen(&report), "Stale sweep cancelled");
                break;
            }

            let rec = match accounting::reconcile_checked(&session, now) {
                Ok(rec) => rec,
                Err(e) => {
                    report.invalid += 1;
                    tracing::warn!(session_id = %session.id, error = %e, "Skipping session with invalid accounting data");
                    metrics::counter!("questline_sweep_sessions_total", "outcome" => "invalid").increment(1);
                    on_candidate(&report);
                    continue;
                }
            };

            let patch = CompletionPatch::abandoned(&session, now, rec);
            match self.store.complete_if_unchanged(&patch).await {
                Ok(PatchOutcome::Applied) => {
                    report.closed += 1;
                    tracing::info!(
                        session_id = %session.id,
                        user_id = %session.user_id,
                        xp_total = patch.xp_total,
                        focused_secs = patch.focused_duration_seconds,
                        "Closed abandoned session"
                    );
                    metrics::counter!("questline_sweep_sessions_total", "outcome" => "closed").increment(1);
                }
                Ok(PatchOutcome::PreconditionFailed) => {
                    report.conflicts += 1;
                    tracing::debug!(session_id = %session.id, "Session changed since read, skipping");
                    metrics::counter!("questline_sweep_sessions_total", "outcome" => "conflict").increment(1);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(session_id = %session.id, error = %e, "Failed to close stale session");
                    metrics::counter!("questline_sweep_sessions_total", "outcome" => "failed").increment(1);
                }
            }
            on_candidate(&report);
        }

        tracing::info!(
            candidates = report.candidates,
            closed = report.closed,
            conflicts = report.conflicts,
            invalid = report.invalid,
            failed = report.failed,
            "Stale sweep finished"
        );
        Ok(report)
    }
}

#[async_trait]
impl<S: SessionStore + 'static> ScheduledJob for StaleSweep<S> {
    fn job_type(&self) -> &'static str {
        "stale_sweep"
    }

    async fn execute(
        &self,
        state: Arc<JobState>,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, String> {
        let report = self
            .run_with(Utc::now(), &cancel, |r| {
                state.set_total(r.candidates as u64);
                state.increment();
            })
            .await
            .map_err(|e| e.to_string())?;
        if report.interrupted {
            Ok(JobOutcome::Cancelled(report.summary()))
        } else {
            Ok(JobOutcome::Completed(report.summary()))
        }
    }
}

fn seen(report: &SweepReport) -> usize {
    report.closed + report.conflicts + report.invalid + report.failed
}
