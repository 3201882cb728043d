// crates/server-jobs/src/state.rs
//! Atomic state tracking for a single job run.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;

use super::types::{JobId, JobProgress, JobStatus};

/// Progress of one job run.
///
/// Counters are lock-free atomics (only `message` sits behind a RwLock) so
/// reporting never blocks the job itself. Every change is pushed to the
/// runner-wide broadcast channel.
pub struct JobState {
    id: JobId,
    job_type: String,
    status: AtomicU8,
    current: AtomicU64,
    total: AtomicU64,
    message: RwLock<Option<String>>,
    progress_tx: broadcast::Sender<JobProgress>,
}

impl JobState {
    pub fn new(id: JobId, job_type: String, progress_tx: broadcast::Sender<JobProgress>) -> Self {
        Self {
            id,
            job_type,
            status: AtomicU8::new(JobStatus::Pending as u8),
            current: AtomicU64::new(0),
            total: AtomicU64::new(0),
            message: RwLock::new(None),
            progress_tx,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn set_running(&self) {
        self.set_status(JobStatus::Running);
    }

    /// Set the number of items this run will look at.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.broadcast_progress();
    }

    /// Increment the progress counter and broadcast. Returns the new value.
    pub fn increment(&self) -> u64 {
        let new = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        self.broadcast_progress();
        new
    }

    pub fn complete(&self, summary: impl Into<String>) {
        self.write_message(summary.into());
        self.set_status(JobStatus::Completed);
    }

    pub fn cancelled(&self, summary: impl Into<String>) {
        self.write_message(summary.into());
        self.set_status(JobStatus::Cancelled);
    }

    pub fn fail(&self, error: impl Into<String>) {
        self.write_message(error.into());
        self.set_status(JobStatus::Failed);
    }

    /// Current state as a progress record.
    pub fn snapshot(&self) -> JobProgress {
        JobProgress {
            job_id: self.id,
            job_type: self.job_type.clone(),
            status: self.status().as_str().to_string(),
            current: self.current.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            message: match self.message.read() {
                Ok(g) => g.clone(),
                Err(e) => {
                    tracing::error!("RwLock poisoned reading message: {e}");
                    None
                }
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn set_status(&self, status: JobStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
        self.broadcast_progress();
    }

    fn write_message(&self, msg: String) {
        match self.message.write() {
            Ok(mut guard) => *guard = Some(msg),
            Err(e) => tracing::error!("RwLock poisoned writing message: {e}"),
        }
    }

    fn broadcast_progress(&self) {
        // No subscribers is fine.
        let _ = self.progress_tx.send(self.snapshot());
    }
}
