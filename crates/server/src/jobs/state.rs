// crates/server/src/jobs/state.rs
//! Mutable state of a single job, guarded by a per-job lock.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use bidsify_core::{JobAction, JobError, JobId, JobOutcome, JobStatus, JobSummary, LogRecord};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::types::{JobSnapshot, LogEvent, SubscriberId, Termination};

/// An attached observer's delivery queue.
pub(crate) struct Subscriber {
    pub(crate) id: SubscriberId,
    pub(crate) tx: mpsc::Sender<LogEvent>,
}

/// The fields of a job that change while it runs.
///
/// Fields are private; every change goes through a transition method that
/// enforces the lifecycle rules.
pub struct JobRecord {
    status: JobStatus,
    logs: Vec<LogRecord>,
    returncode: Option<i32>,
    artifacts: Option<Vec<PathBuf>>,
    error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
    pub(crate) subscribers: Vec<Subscriber>,
}

impl JobRecord {
    fn new() -> Self {
        Self {
            status: JobStatus::Queued,
            logs: Vec::new(),
            returncode: None,
            artifacts: None,
            error: None,
            finished_at: None,
            subscribers: Vec::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn logs(&self) -> &[LogRecord] {
        &self.logs
    }

    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        self.artifacts.as_deref().unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// The terminal outcome, once the job has one.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.status.is_terminal().then(|| JobOutcome {
            status: self.status,
            returncode: self.returncode,
            error: self.error.clone(),
        })
    }

    fn transition(&mut self, id: &JobId, to: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                id: id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Claim the job for a runner. Fails unless the job is still queued.
    pub(crate) fn mark_running(&mut self, id: &JobId) -> Result<(), JobError> {
        self.transition(id, JobStatus::Running)
    }

    /// Append a line. Returns `false` (and drops the line) once terminal.
    pub(crate) fn append_log(&mut self, record: LogRecord) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.logs.push(record);
        true
    }

    /// Move to the terminal status implied by `termination`.
    pub(crate) fn finish(
        &mut self,
        id: &JobId,
        termination: &Termination,
    ) -> Result<JobOutcome, JobError> {
        let outcome = termination.outcome();
        self.transition(id, outcome.status)?;
        self.returncode = outcome.returncode;
        self.error = outcome.error.clone();
        self.finished_at = Some(Utc::now());
        Ok(outcome)
    }

    /// Record discovered artifacts. Only the first call has an effect.
    pub(crate) fn set_artifacts(&mut self, paths: Vec<PathBuf>) -> bool {
        if self.artifacts.is_some() {
            return false;
        }
        self.artifacts = Some(paths);
        true
    }
}

/// A registered job: immutable identity plus its locked [`JobRecord`].
pub struct JobEntry {
    id: JobId,
    action: JobAction,
    created_at: DateTime<Utc>,
    record: Mutex<JobRecord>,
}

impl JobEntry {
    pub(crate) fn new(id: JobId, action: JobAction) -> Self {
        Self {
            id,
            action,
            created_at: Utc::now(),
            record: Mutex::new(JobRecord::new()),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn action(&self) -> JobAction {
        self.action
    }

    fn lock(&self) -> MutexGuard<'_, JobRecord> {
        match self.record.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(job_id = %self.id, "Job lock poisoned, recovering state");
                poisoned.into_inner()
            }
        }
    }

    /// Run `f` with exclusive access to the record.
    ///
    /// Never call back into the registry from `f`; the lock is not reentrant.
    pub fn with_record<R>(&self, f: impl FnOnce(&mut JobRecord) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.lock().outcome()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            status: self.status(),
            action: self.action,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let record = self.lock();
        JobSnapshot {
            id: self.id.clone(),
            action: self.action,
            status: record.status,
            returncode: record.returncode,
            logs: record.logs.clone(),
            artifacts: record.artifacts().to_vec(),
            error: record.error.clone(),
            created_at: self.created_at,
            finished_at: record.finished_at,
        }
    }
}
