// crates/server/src/state.rs
//! Application state for the Axum server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use questline_db::Database;
use questline_server_jobs::{JobRunner, JobTrigger};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Session record store.
    pub db: Database,
    /// Tracks every sweep and sync run for the jobs API.
    pub jobs: Arc<JobRunner>,
    /// Manual triggers keyed by job type. Empty when no jobs are scheduled.
    pub triggers: HashMap<&'static str, JobTrigger>,
    /// Whether a sync endpoint is configured.
    pub sync_enabled: bool,
}

impl AppState {
    /// State with no scheduled jobs, used by tests and API-only runs.
    pub fn new(db: Database) -> Arc<Self> {
        Self::with_jobs(db, Arc::new(JobRunner::new()), Vec::new(), false)
    }

    pub fn with_jobs(
        db: Database,
        jobs: Arc<JobRunner>,
        triggers: Vec<JobTrigger>,
        sync_enabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            jobs,
            triggers: triggers
                .into_iter()
                .map(|t| (t.job_type(), t))
                .collect(),
            sync_enabled,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questline_server_jobs::{Scheduler, StaleSweep};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_triggers_keyed_by_job_type() {
        let db = Database::new_in_memory().await.unwrap();
        let runner = Arc::new(JobRunner::new());
        let scheduler = Scheduler::new(Arc::clone(&runner), CancellationToken::new());
        let sweep = scheduler.trigger_for(Arc::new(StaleSweep::new(
            db.clone(),
            std::time::Duration::from_secs(300),
        )));

        let state = AppState::with_jobs(db, runner, vec![sweep], false);
        assert!(state.triggers.contains_key("stale_sweep"));
        assert!(state.uptime_secs() < 5);
    }
}
