// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Errors raised by the job orchestration core.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Artifact index {index} out of range (job has {len} artifacts)")]
    ArtifactIndexOutOfRange { index: usize, len: usize },

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from materializing or parsing a tool configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to write temporary config: {source}")]
    Write {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove temporary config {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration: {message}")]
    Malformed { message: String },
}

/// Errors from artifact discovery. Never fatal to a job.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("IO error checking artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    pub fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_display() {
        let err = JobError::NotFound(JobId::from("abc"));
        assert_eq!(err.to_string(), "Job not found: abc");

        let err = JobError::ArtifactIndexOutOfRange { index: 5, len: 2 };
        assert_eq!(
            err.to_string(),
            "Artifact index 5 out of range (job has 2 artifacts)"
        );

        let err = JobError::InvalidTransition {
            id: JobId::from("j1"),
            from: JobStatus::Completed,
            to: JobStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition for job j1: completed -> running"
        );
    }

    #[test]
    fn test_launch_error_keeps_source() {
        let err = JobError::launch(
            "python3",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert!(err.to_string().contains("python3"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_converts() {
        let err: JobError = ConfigError::Malformed {
            message: "bad yaml".into(),
        }
        .into();
        assert!(matches!(err, JobError::Config(_)));
        assert_eq!(err.to_string(), "Malformed configuration: bad yaml");
    }
}
