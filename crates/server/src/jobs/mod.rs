// crates/server/src/jobs/mod.rs
//! Job orchestration for conversion tool runs.
//!
//! Provides:
//! - `JobRegistry` - thread-safe table of jobs and their per-job state
//! - `LogBroadcaster` - backlog replay plus live fan-out of log lines
//! - `JobRunner` - launches the tool and drives a job to completion
//! - `ProcessLauncher` - seam for starting the child process

pub mod broadcast;
pub mod launcher;
pub mod registry;
pub mod runner;
pub mod state;
pub mod types;

pub use broadcast::{LogBroadcaster, LogSubscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use launcher::{ProcessLauncher, TokioLauncher};
pub use registry::{JobRegistry, DEFAULT_MAX_JOBS};
pub use runner::{ExecutedJob, JobRunner, PreparedJob};
pub use state::{JobEntry, JobRecord};
pub use types::{JobSnapshot, LogEvent, SubscriberId, Termination};
