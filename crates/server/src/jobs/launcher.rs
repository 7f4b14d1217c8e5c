// crates/server/src/jobs/launcher.rs
//! Starting the external tool as a child process.

use std::process::{ExitStatus, Stdio};

use bidsify_core::{JobError, ToolCommand};
use tokio::process::{Child, Command};

/// Starts a tool invocation with piped stdout and stderr.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, command: &ToolCommand) -> Result<Child, JobError>;
}

/// Spawns the command directly through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, command: &ToolCommand) -> Result<Child, JobError> {
        Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| JobError::launch(&command.program, e))
    }
}

/// Exit code of a finished child. A signal-terminated child on Unix reports
/// the negated signal number.
pub fn exit_code(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(-signal);
        }
    }
    None
}
