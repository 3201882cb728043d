// crates/server-jobs/src/lib.rs
//! Reconciliation jobs and the machinery that runs them.
//!
//! - `StaleSweep` closes Live sessions whose heartbeats stopped
//! - `SyncReconciler` pushes completed sessions and flags them as synced
//! - `Scheduler` / `JobTrigger` run jobs periodically without overlap
//! - `JobRunner` / `JobState` track each run for the jobs API

pub mod push;
pub mod runner;
pub mod scheduler;
pub mod stale_sweep;
pub mod state;
pub mod sync;
pub mod types;

pub use push::{HttpSyncPush, PushError, SyncPush};
pub use runner::JobRunner;
pub use scheduler::{JobTrigger, RunGate, RunPermit, ScheduledJob, Scheduler};
pub use stale_sweep::{StaleSweep, SweepReport};
pub use state::JobState;
pub use sync::{RetryPolicy, SyncReconciler, SyncReport};
pub use types::{JobHandle, JobId, JobOutcome, JobProgress, JobStatus};
