// crates/server-jobs/src/scheduler.rs
//! Periodic, non-overlapping execution of reconciliation jobs.
//!
//! Each job gets its own task. The loop waits for a run to finish before it
//! starts counting down to the next one, and a per-job [`RunGate`] turns away
//! manual triggers while a run is in progress. Different jobs may overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::runner::JobRunner;
use crate::state::JobState;
use crate::types::{JobHandle, JobOutcome};

/// A job the scheduler can run.
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    /// Stable name, used as the job type in progress records and metrics.
    fn job_type(&self) -> &'static str;

    /// One run. `Err` marks the run as failed.
    async fn execute(
        &self,
        state: Arc<JobState>,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, String>;
}

/// At most one run at a time.
#[derive(Debug, Clone, Default)]
pub struct RunGate {
    busy: Arc<AtomicBool>,
}

impl RunGate {
    /// Claim the gate. `None` while another run holds it.
    pub fn try_enter(&self) -> Option<RunPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases its [`RunGate`] on drop.
#[derive(Debug)]
pub struct RunPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Starts runs of one job, refusing to overlap them.
#[derive(Clone)]
pub struct JobTrigger {
    job: Arc<dyn ScheduledJob>,
    gate: RunGate,
    runner: Arc<JobRunner>,
    cancel: CancellationToken,
}

impl JobTrigger {
    pub fn new(job: Arc<dyn ScheduledJob>, runner: Arc<JobRunner>, cancel: CancellationToken) -> Self {
        Self {
            job,
            gate: RunGate::default(),
            runner,
            cancel,
        }
    }

    pub fn job_type(&self) -> &'static str {
        self.job.job_type()
    }

    pub fn is_running(&self) -> bool {
        self.gate.is_busy()
    }

    /// Start a run. `None` if one is already in progress or shutdown began.
    pub fn trigger(&self) -> Option<JobHandle> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let Some(permit) = self.gate.try_enter() else {
            tracing::debug!(job_type = self.job.job_type(), "Run already in progress, skipping");
            return None;
        };

        let job = Arc::clone(&self.job);
        let job_type = job.job_type();
        Some(self.runner.start_job(job_type, self.cancel.clone(), move |state, cancel| async move {
            let _permit = permit;
            let started = std::time::Instant::now();
            let result = job.execute(state, cancel).await;
            let status = match &result {
                Ok(JobOutcome::Completed(_)) => "completed",
                Ok(JobOutcome::Cancelled(_)) => "cancelled",
                Err(_) => "failed",
            };
            metrics::counter!("questline_job_runs_total", "job" => job_type, "status" => status)
                .increment(1);
            metrics::histogram!("questline_job_duration_seconds", "job" => job_type)
                .record(started.elapsed().as_secs_f64());
            result
        }))
    }
}

/// Owns the periodic job tasks.
pub struct Scheduler {
    runner: Arc<JobRunner>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(runner: Arc<JobRunner>, cancel: CancellationToken) -> Self {
        Self {
            runner,
            cancel,
            tasks: Vec::new(),
        }
    }

    /// A trigger for `job` that is not scheduled, only run on demand.
    pub fn trigger_for(&self, job: Arc<dyn ScheduledJob>) -> JobTrigger {
        JobTrigger::new(job, Arc::clone(&self.runner), self.cancel.clone())
    }

    /// Run `job` every `period`, starting immediately. Returns the trigger so
    /// callers can also start runs on demand through the same gate.
    pub fn every(&mut self, job: Arc<dyn ScheduledJob>, period: Duration) -> JobTrigger {
        let trigger = self.trigger_for(job);
        let periodic = trigger.clone();
        let cancel = self.cancel.clone();

        tracing::info!(job_type = trigger.job_type(), period_secs = period.as_secs_f64(), "Scheduling job");
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Some(handle) = periodic.trigger() {
                    handle.wait().await;
                }
            }
            tracing::debug!(job_type = periodic.job_type(), "Job loop stopped");
        }));

        trigger
    }

    /// Cancel every loop and in-flight run, then wait for the loops to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Job loop panicked");
            }
        }
    }
}
