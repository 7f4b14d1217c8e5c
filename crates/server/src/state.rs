// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use bidsify_core::ToolLocator;

use crate::config::ServerConfig;
use crate::jobs::{JobRegistry, JobRunner, LogBroadcaster};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// All known jobs.
    pub registry: Arc<JobRegistry>,
    /// Log fan-out for live observers.
    pub broadcaster: LogBroadcaster,
    /// Launches and drives tool runs.
    pub runner: JobRunner,
}

impl AppState {
    /// Build state from the server configuration.
    pub fn new(config: &ServerConfig) -> Arc<Self> {
        let registry = Arc::new(JobRegistry::with_capacity(config.max_jobs));
        let broadcaster = LogBroadcaster::with_capacity(registry, config.subscriber_capacity);
        let mut runner = JobRunner::new(broadcaster, config.tool.clone());
        if let Some(dir) = &config.config_dir {
            runner = runner.with_config_dir(dir);
        }
        Self::from_runner(runner)
    }

    /// Wrap an already configured runner. Registry and broadcaster are
    /// taken from it.
    pub fn from_runner(runner: JobRunner) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            registry: Arc::clone(runner.registry()),
            broadcaster: runner.broadcaster().clone(),
            runner,
        })
    }

    /// State with default limits for the given tool.
    pub fn with_tool(tool: ToolLocator) -> Arc<Self> {
        Self::new(&ServerConfig {
            tool,
            ..ServerConfig::default()
        })
    }

    /// Get server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidsify_core::JobAction;

    #[test]
    fn test_state_shares_one_registry() {
        let state = AppState::with_tool(ToolLocator::default());
        let id = state.runner.register(JobAction::Run);
        assert!(state.registry.get(&id).is_ok());
        assert!(state.broadcaster.registry().get(&id).is_ok());
        assert_eq!(state.uptime_secs(), 0);
    }
}
