// crates/server/src/jobs/types.rs
//! Types for the job orchestration system.

use std::path::PathBuf;

use bidsify_core::{
    JobAction, JobDetail, JobId, JobOutcome, JobStatus, JobSummary, LogRecord, LogStream,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifier of one attached log observer.
pub type SubscriberId = u64;

/// What an observer receives: log lines, then exactly one `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Line(LogRecord),
    Done(JobOutcome),
}

/// How the runner ended a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The tool exited with this code (negative for a terminating signal).
    Exited(i32),
    /// The tool could not be started.
    LaunchFailed(String),
    /// The job was cut short without an exit code.
    Aborted(String),
}

impl Termination {
    pub fn status(&self) -> JobStatus {
        match self {
            Termination::Exited(0) => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        match self {
            Termination::Exited(code) => JobOutcome {
                status: self.status(),
                returncode: Some(*code),
                error: None,
            },
            Termination::LaunchFailed(msg) | Termination::Aborted(msg) => JobOutcome {
                status: JobStatus::Failed,
                returncode: None,
                error: Some(msg.clone()),
            },
        }
    }
}

/// Point-in-time copy of a job, safe to hold without any lock.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub action: JobAction,
    pub status: JobStatus,
    pub returncode: Option<i32>,
    pub logs: Vec<LogRecord>,
    pub artifacts: Vec<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            status: self.status,
            action: self.action,
        }
    }

    pub fn detail(&self) -> JobDetail {
        JobDetail {
            id: self.id.clone(),
            status: self.status,
            action: self.action,
            returncode: self.returncode,
            logs_count: self.logs.len(),
            error: self.error.clone(),
        }
    }

    /// Lines from one stream, newline-joined.
    pub fn stream_text(&self, stream: LogStream) -> String {
        self.logs
            .iter()
            .filter(|r| r.stream == stream)
            .map(|r| r.line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
