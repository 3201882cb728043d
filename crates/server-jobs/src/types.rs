// crates/server-jobs/src/types.rs
//! Types for tracked job runs.

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a job run.
pub type JobId = u64;

/// Status of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl JobStatus {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => JobStatus::Pending,
            1 => JobStatus::Running,
            2 => JobStatus::Completed,
            3 => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

/// How a job body ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Finished; the string is a one-line summary.
    Completed(String),
    /// Stopped early by cancellation.
    Cancelled(String),
}

/// Handle to a running job.
pub struct JobHandle {
    pub id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { id, cancel, task }
    }

    /// Ask the job to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job task to finish.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::error!(job_id = self.id, error = %e, "Job task panicked");
        }
    }
}

/// Progress update sent via SSE.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: JobId,
    pub job_type: String,
    pub status: String,
    pub current: u64,
    pub total: u64,
    pub message: Option<String>,
    pub timestamp: String,
}
