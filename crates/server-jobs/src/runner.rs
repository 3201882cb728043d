// crates/server-jobs/src/runner.rs
//! Central runner that spawns and tracks job runs.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::state::JobState;
use super::types::{JobHandle, JobId, JobOutcome, JobProgress};

/// Finished runs kept for `/api/jobs` before the oldest are dropped.
const FINISHED_HISTORY: usize = 32;

/// Spawns job runs with progress tracking.
///
/// Thread-safe via `Arc` wrapping. `subscribe` yields SSE-ready updates
/// from every run.
pub struct JobRunner {
    next_id: AtomicU64,
    jobs: RwLock<BTreeMap<JobId, Arc<JobState>>>,
    global_tx: broadcast::Sender<JobProgress>,
}

impl JobRunner {
    pub fn new() -> Self {
        let (global_tx, _) = broadcast::channel(256);
        Self {
            next_id: AtomicU64::new(1),
            jobs: RwLock::new(BTreeMap::new()),
            global_tx,
        }
    }

    /// Spawn a job run.
    ///
    /// `f` receives the run's [`JobState`] for progress and a child of
    /// `cancel`. `Ok` maps to Completed or Cancelled, `Err` to Failed.
    pub fn start_job<F, Fut>(
        &self,
        job_type: impl Into<String>,
        cancel: CancellationToken,
        f: F,
    ) -> JobHandle
    where
        F: FnOnce(Arc<JobState>, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobOutcome, String>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(JobState::new(id, job_type.into(), self.global_tx.clone()));

        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(id, Arc::clone(&state));
                prune_finished(&mut jobs);
            }
            Err(e) => tracing::error!("RwLock poisoned writing jobs map: {e}"),
        }

        let token = cancel.child_token();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            state.set_running();
            match f(Arc::clone(&state), task_token).await {
                Ok(JobOutcome::Completed(summary)) => state.complete(summary),
                Ok(JobOutcome::Cancelled(summary)) => state.cancelled(summary),
                Err(e) => state.fail(e),
            }
        });

        JobHandle::new(id, token, task)
    }

    /// Subscribe to progress updates from every run.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.global_tx.subscribe()
    }

    pub fn get_job(&self, id: JobId) -> Option<JobProgress> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(&id).map(|s| s.snapshot()),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                None
            }
        }
    }

    /// Every tracked run, newest first.
    pub fn list_jobs(&self) -> Vec<JobProgress> {
        match self.jobs.read() {
            Ok(jobs) => jobs.values().rev().map(|s| s.snapshot()).collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs: {e}");
                Vec::new()
            }
        }
    }

    /// Runs that have not finished yet.
    pub fn active_jobs(&self) -> Vec<JobProgress> {
        match self.jobs.read() {
            Ok(jobs) => jobs
                .values()
                .filter(|s| !s.status().is_finished())
                .map(|s| s.snapshot())
                .collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs: {e}");
                Vec::new()
            }
        }
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn prune_finished(jobs: &mut BTreeMap<JobId, Arc<JobState>>) {
    let finished: Vec<JobId> = jobs
        .iter()
        .filter(|(_, s)| s.status().is_finished())
        .map(|(id, _)| *id)
        .collect();
    let excess = finished.len().saturating_sub(FINISHED_HISTORY);
    for id in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
}
