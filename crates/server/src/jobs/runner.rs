// crates/server/src/jobs/runner.rs
//! Drives one tool invocation from launch to completion.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bidsify_core::{
    ArtifactResolver, JobAction, JobError, JobId, JobOutcome, LogRecord, LogStream,
    ProjectLogsResolver, TempConfig, ToolCommand, ToolConfig, ToolLocator,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use super::broadcast::LogBroadcaster;
use super::launcher::{self, ProcessLauncher, TokioLauncher};
use super::registry::JobRegistry;
use super::state::JobEntry;
use super::types::{JobSnapshot, Termination};

/// Everything needed to launch a job, built before the job is registered.
///
/// Owns the temporary configuration file; dropping it deletes the file.
#[derive(Debug)]
pub struct PreparedJob {
    pub command: ToolCommand,
    config: TempConfig,
    parsed: Option<ToolConfig>,
}

impl PreparedJob {
    pub fn config_path(&self) -> &Path {
        self.config.path()
    }
}

/// Result of running a job to completion in the caller's task.
#[derive(Debug, Clone)]
pub struct ExecutedJob {
    pub command: ToolCommand,
    pub snapshot: JobSnapshot,
}

/// Launches tool processes and drives their jobs through the lifecycle.
///
/// Cheap to clone; clones share the registry and broadcaster.
#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    broadcaster: LogBroadcaster,
    tool: Arc<ToolLocator>,
    launcher: Arc<dyn ProcessLauncher>,
    resolver: Arc<dyn ArtifactResolver>,
    config_dir: Option<PathBuf>,
}

impl JobRunner {
    pub fn new(broadcaster: LogBroadcaster, tool: ToolLocator) -> Self {
        Self {
            registry: Arc::clone(broadcaster.registry()),
            broadcaster,
            tool: Arc::new(tool),
            launcher: Arc::new(TokioLauncher),
            resolver: Arc::new(ProjectLogsResolver),
            config_dir: None,
        }
    }

    pub fn with_launcher(mut self, launcher: impl ProcessLauncher + 'static) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    pub fn with_resolver(mut self, resolver: impl ArtifactResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Write temporary configs into `dir` instead of the system temp dir.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        &self.broadcaster
    }

    pub fn tool(&self) -> &ToolLocator {
        &self.tool
    }

    /// Materialize the configuration and build the command line.
    ///
    /// Nothing is registered yet, so a failure here leaves no job behind.
    pub fn prepare(&self, config_text: &str, action: JobAction) -> Result<PreparedJob, JobError> {
        let config = match &self.config_dir {
            Some(dir) => TempConfig::materialize_in(dir, config_text)?,
            None => TempConfig::materialize(config_text)?,
        };
        let parsed = ToolConfig::parse_lenient(config_text);
        let command = self.tool.command(config.path(), action);
        Ok(PreparedJob {
            command,
            config,
            parsed,
        })
    }

    /// Register a queued job for `action`.
    pub fn register(&self, action: JobAction) -> JobId {
        let id = self.registry.create(action);
        crate::metrics::record_job_submitted(action);
        id
    }

    /// Prepare, register and start a job in the background.
    pub fn submit(&self, config_text: &str, action: JobAction) -> Result<JobId, JobError> {
        let prepared = self.prepare(config_text, action)?;
        let id = self.register(action);
        tracing::info!(job_id = %id, action = %action, "Job submitted");
        drop(self.spawn(id.clone(), prepared));
        Ok(id)
    }

    /// Run a registered job on a background task.
    pub fn spawn(&self, job_id: JobId, job: PreparedJob) -> JoinHandle<Result<JobOutcome, JobError>> {
        let runner = self.clone();
        tokio::spawn(async move {
            let result = runner.run(job_id.clone(), job).await;
            if let Err(e) = &result {
                tracing::error!(job_id = %job_id, error = %e, "Job could not be run");
            }
            result
        })
    }

    /// Prepare, register and run a job, waiting for it to finish.
    pub async fn execute(
        &self,
        config_text: &str,
        action: JobAction,
    ) -> Result<ExecutedJob, JobError> {
        let prepared = self.prepare(config_text, action)?;
        let command = prepared.command.clone();
        let id = self.register(action);
        let entry = self.registry.entry(&id)?;
        self.run(id, prepared).await?;
        Ok(ExecutedJob {
            command,
            snapshot: entry.snapshot(),
        })
    }

    /// Drive a queued job to its terminal state.
    ///
    /// Claims the job first; a job that is not queued is rejected, so at most
    /// one runner ever drives a given job. Returns once artifacts are recorded
    /// and the temporary configuration is gone. Dropping the returned future
    /// after the claim does not stop the job or its bookkeeping.
    pub async fn run(&self, job_id: JobId, job: PreparedJob) -> Result<JobOutcome, JobError> {
        let entry = self.registry.entry(&job_id)?;
        entry.with_record(|record| record.mark_running(&job_id))?;

        let runner = self.clone();
        let supervised = Arc::clone(&entry);
        match tokio::spawn(runner.supervise(supervised, job)).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job supervisor aborted");
                Ok(entry.outcome().unwrap_or_else(|| {
                    Termination::Aborted(format!("job supervisor aborted: {e}")).outcome()
                }))
            }
        }
    }

    /// Own a claimed job until it is fully finished, isolating the drive
    /// task so a panic there still terminates the job.
    async fn supervise(self, entry: Arc<JobEntry>, job: PreparedJob) -> JobOutcome {
        let job_id = entry.id().clone();
        let action = entry.action();
        let started = Instant::now();

        let runner = self.clone();
        let driven = Arc::clone(&entry);
        let outcome = match tokio::spawn(async move { runner.drive(&driven, job).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job task aborted");
                let termination = Termination::Aborted(format!("job task aborted: {e}"));
                let outcome = match entry.outcome() {
                    Some(outcome) => outcome,
                    None => self.finish(&job_id, &termination),
                };
                record_artifacts(&entry, Vec::new());
                outcome
            }
        };

        crate::metrics::record_job_finished(action, outcome.status, started.elapsed());
        tracing::info!(
            job_id = %job_id,
            action = %action,
            status = %outcome.status,
            returncode = ?outcome.returncode,
            duration_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );
        outcome
    }

    async fn drive(&self, entry: &JobEntry, job: PreparedJob) -> JobOutcome {
        let job_id = entry.id();
        let PreparedJob {
            command,
            config,
            parsed,
        } = job;
        tracing::info!(job_id = %job_id, command = %command, "Launching tool");

        let mut child = match self.launcher.launch(&command) {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to launch tool");
                let outcome = self.finish(job_id, &Termination::LaunchFailed(e.to_string()));
                record_artifacts(entry, Vec::new());
                config.release_logged();
                return outcome;
            }
        };

        // Both pipes are drained concurrently so neither can fill up and
        // block the child.
        let stdout = self.spawn_drain(job_id, LogStream::Stdout, child.stdout.take());
        let stderr = self.spawn_drain(job_id, LogStream::Stderr, child.stderr.take());
        let (stdout, stderr) = tokio::join!(stdout, stderr);
        for (stream, result) in [(LogStream::Stdout, stdout), (LogStream::Stderr, stderr)] {
            match result {
                Ok(Ok(lines)) => {
                    tracing::debug!(job_id = %job_id, stream = %stream, lines, "Stream drained")
                }
                Ok(Err(e)) => {
                    tracing::warn!(job_id = %job_id, stream = %stream, error = %e, "Error reading tool output")
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, stream = %stream, error = %e, "Output reader aborted")
                }
            }
        }

        let termination = match child.wait().await {
            Ok(status) => match launcher::exit_code(status) {
                Some(code) => Termination::Exited(code),
                None => Termination::Aborted("tool exited without a status code".to_string()),
            },
            Err(e) => Termination::Aborted(format!("failed to wait for tool: {e}")),
        };

        let outcome = self.finish(job_id, &termination);
        let artifacts = self.resolve_artifacts(job_id, parsed).await;
        record_artifacts(entry, artifacts);
        config.release_logged();
        outcome
    }

    fn spawn_drain<R>(
        &self,
        job_id: &JobId,
        stream: LogStream,
        reader: Option<R>,
    ) -> JoinHandle<io::Result<usize>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let broadcaster = self.broadcaster.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            match reader {
                Some(reader) => drain_lines(reader, stream, &job_id, &broadcaster).await,
                None => Ok(0),
            }
        })
    }

    fn finish(&self, job_id: &JobId, termination: &Termination) -> JobOutcome {
        match self.broadcaster.terminate(job_id, termination) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not mark job finished");
                termination.outcome()
            }
        }
    }

    async fn resolve_artifacts(&self, job_id: &JobId, parsed: Option<ToolConfig>) -> Vec<PathBuf> {
        let resolver = Arc::clone(&self.resolver);
        match tokio::task::spawn_blocking(move || resolver.resolve(parsed.as_ref())).await {
            Ok(Ok(paths)) => paths,
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Artifact discovery failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Artifact discovery aborted");
                Vec::new()
            }
        }
    }
}

/// Store artifacts on the entry itself; the job may already be evicted from
/// the registry once it is terminal.
fn record_artifacts(entry: &JobEntry, artifacts: Vec<PathBuf>) {
    let count = artifacts.len();
    if entry.with_record(|record| record.set_artifacts(artifacts)) {
        tracing::debug!(job_id = %entry.id(), count, "Artifacts recorded");
    }
}

/// Read `reader` line by line and publish each line to the job.
async fn drain_lines<R>(
    reader: R,
    stream: LogStream,
    job_id: &JobId,
    broadcaster: &LogBroadcaster,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    let mut lines = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(lines);
        }
        let record = LogRecord::new(stream, decode_line(&buf));
        if let Err(e) = broadcaster.publish(job_id, record) {
            tracing::debug!(job_id = %job_id, error = %e, "Dropping output line");
        }
        lines += 1;
    }
}

/// Strip the line terminator and decode, replacing invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::LogEvent;
    use bidsify_core::JobStatus;
    use std::time::Duration;

    /// Runner whose "interpreter" is `sh` and whose script is written to `dir`.
    fn runner_with_script(dir: &Path, script: &str) -> JobRunner {
        let script_path = dir.join("fake_tool.sh");
        std::fs::write(&script_path, script).unwrap();
        let registry = Arc::new(JobRegistry::new());
        let broadcaster = LogBroadcaster::new(registry);
        JobRunner::new(broadcaster, ToolLocator::new("sh", script_path)).with_config_dir(dir)
    }

    fn config_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("natmeg_config_"))
            .collect()
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\n"), "");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_runner_start_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with_script(
            dir.path(),
            "echo one\necho two\necho oops >&2\necho \"$@\"\nexit 0\n",
        );

        let executed = runner.execute("Project: {}\n", JobAction::Analyse).await.unwrap();
        let snap = executed.snapshot;
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.returncode, Some(0));
        assert_eq!(snap.stream_text(LogStream::Stdout).lines().count(), 3);
        assert_eq!(snap.stream_text(LogStream::Stderr), "oops");
        assert!(snap.stream_text(LogStream::Stdout).ends_with("--analyse"));
        assert!(snap.artifacts.is_empty());
        assert_eq!(executed.command.program, "sh");
        assert!(config_files(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_runner_failure_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with_script(dir.path(), "echo failing >&2\nexit 4\n");

        let snap = runner.execute("", JobAction::Run).await.unwrap().snapshot;
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.returncode, Some(4));
        assert_eq!(snap.error, None);
    }

    #[tokio::test]
    async fn test_job_runner_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let runner = JobRunner::new(
            LogBroadcaster::new(registry),
            ToolLocator::new("/nonexistent/python-for-bidsify", "bidsify.py"),
        )
        .with_config_dir(dir.path());

        let snap = runner.execute("", JobAction::Report).await.unwrap().snapshot;
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.returncode, None);
        assert!(snap.error.unwrap().contains("/nonexistent/python-for-bidsify"));
        assert!(snap.artifacts.is_empty());
        assert!(config_files(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_runner_reads_config_then_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with_script(dir.path(), "cat \"$2\"\n");

        let prepared = runner.prepare("Project:\n  Name: demo\n", JobAction::Run).unwrap();
        let config_path = prepared.config_path().to_path_buf();
        assert!(config_path.exists());

        let id = runner.register(JobAction::Run);
        let outcome = runner.spawn(id.clone(), prepared).await.unwrap().unwrap();
        assert!(outcome.succeeded());
        assert!(!config_path.exists());

        let snap = runner.registry().get(&id).unwrap();
        assert_eq!(snap.stream_text(LogStream::Stdout), "Project:\n  Name: demo");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_runner_records_existing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("study").join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("bids_conversion.tsv"), "").unwrap();
        std::fs::write(logs.join("bids_results.json"), "{}").unwrap();

        let runner = runner_with_script(dir.path(), "exit 0\n");
        let config = format!("Project:\n  Root: {}\n  Name: study\n", dir.path().display());
        let snap = runner.execute(&config, JobAction::Analyse).await.unwrap().snapshot;
        assert_eq!(
            snap.artifacts,
            vec![logs.join("bids_conversion.tsv"), logs.join("bids_results.json")]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_runner_rejects_second_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with_script(dir.path(), "exit 0\n");
        let id = runner.register(JobAction::Run);

        let first = runner.prepare("", JobAction::Run).unwrap();
        runner.run(id.clone(), first).await.unwrap();

        let second = runner.prepare("", JobAction::Run).unwrap();
        let err = runner.run(id.clone(), second).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert!(config_files(dir.path()).is_empty());
    }

    /// Resolver that fills the registry while resolving, evicting the
    /// just-finished job before its artifacts are stored.
    struct EvictingResolver {
        registry: Arc<JobRegistry>,
        artifact: PathBuf,
    }

    impl ArtifactResolver for EvictingResolver {
        fn resolve(
            &self,
            _config: Option<&ToolConfig>,
        ) -> Result<Vec<PathBuf>, bidsify_core::ResolveError> {
            self.registry.create(JobAction::Run);
            Ok(vec![self.artifact.clone()])
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_runner_keeps_artifacts_when_job_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("fake_tool.sh");
        std::fs::write(&script_path, "exit 0\n").unwrap();
        let registry = Arc::new(JobRegistry::with_capacity(1));
        let artifact = dir.path().join("bids_results.json");
        let runner = JobRunner::new(
            LogBroadcaster::new(Arc::clone(&registry)),
            ToolLocator::new("sh", script_path),
        )
        .with_resolver(EvictingResolver {
            registry: Arc::clone(&registry),
            artifact: artifact.clone(),
        })
        .with_config_dir(dir.path());

        let executed = runner.execute("", JobAction::Analyse).await.unwrap();
        assert_eq!(executed.snapshot.status, JobStatus::Completed);
        assert_eq!(executed.snapshot.artifacts, vec![artifact]);
        assert!(registry.get(&executed.snapshot.id).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_finishes_after_caller_drops_execute() {
        crate::metrics::init_metrics();
        let dir = tempfile::tempdir().unwrap();
        let gate = dir.path().join("gate");
        let runner = runner_with_script(
            dir.path(),
            &format!("while [ ! -f '{}' ]; do sleep 0.01; done\nexit 0\n", gate.display()),
        );

        let caller = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.execute("", JobAction::Report).await })
        };

        let mut job_id = None;
        for _ in 0..250 {
            if let Some(job) = runner.registry().list().into_iter().next() {
                if job.status == JobStatus::Running {
                    job_id = Some(job.id);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let job_id = job_id.expect("job never started running");

        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        std::fs::write(&gate, "").unwrap();

        let mut finished = false;
        for _ in 0..250 {
            let rendered = crate::metrics::render_metrics().unwrap_or_default();
            let recorded = rendered.lines().any(|line| {
                line.starts_with("jobs_finished_total")
                    && line.contains("action=\"report\"")
                    && line.contains("status=\"completed\"")
            });
            if recorded && config_files(dir.path()).is_empty() {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(finished, "job bookkeeping did not run after the caller went away");
        assert_eq!(runner.registry().get(&job_id).unwrap().status, JobStatus::Completed);
    }

    struct PanickingLauncher;

    impl ProcessLauncher for PanickingLauncher {
        fn launch(&self, _command: &ToolCommand) -> Result<tokio::process::Child, JobError> {
            panic!("launcher exploded");
        }
    }

    #[tokio::test]
    async fn test_job_runner_panic_still_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let runner = JobRunner::new(LogBroadcaster::new(registry), ToolLocator::default())
            .with_launcher(PanickingLauncher)
            .with_config_dir(dir.path());

        let prepared = runner.prepare("", JobAction::Run).unwrap();
        let id = runner.register(JobAction::Run);
        let mut sub = runner.broadcaster().subscribe(&id).unwrap();

        let outcome = runner.run(id.clone(), prepared).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.error.unwrap().contains("aborted"));

        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(LogEvent::Done(_))));
        assert!(config_files(dir.path()).is_empty());
    }
}
