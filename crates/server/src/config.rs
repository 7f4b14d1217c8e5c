// crates/server/src/config.rs
//! Command-line and environment configuration for the server binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use bidsify_core::{ToolLocator, DEFAULT_PYTHON};
use bidsify_observability::LogFormat;
use clap::Parser;

use crate::jobs::{DEFAULT_MAX_JOBS, DEFAULT_SUBSCRIBER_CAPACITY};

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 8080;

/// Directory served as the web UI when none is configured and it exists.
const DEFAULT_STATIC_DIR: &str = "web";

#[derive(Debug, Clone, Parser)]
#[command(name = "bidsify-server", version, about = "HTTP and WebSocket front end for the BIDS conversion tool")]
pub struct Cli {
    /// Address to bind.
    #[arg(long, env = "BIDSIFY_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "BIDSIFY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Web UI directory. Defaults to ./web when present.
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Directory searched for the tool script.
    #[arg(long, env = "BIDSIFY_ROOT", default_value = ".")]
    pub tool_root: PathBuf,

    /// Explicit tool script path; overrides discovery under --tool-root.
    #[arg(long, env = "BIDSIFY_SCRIPT")]
    pub tool_script: Option<PathBuf>,

    /// Interpreter used to run the tool script.
    #[arg(long, env = "PYTHON", default_value = DEFAULT_PYTHON)]
    pub python: String,

    /// Where temporary job configs are written. Defaults to the system temp dir.
    #[arg(long, env = "BIDSIFY_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Jobs retained before finished ones are evicted.
    #[arg(long, env = "BIDSIFY_MAX_JOBS", default_value_t = DEFAULT_MAX_JOBS)]
    pub max_jobs: usize,

    /// Queued events per log observer before it is dropped.
    #[arg(long, env = "BIDSIFY_SUBSCRIBER_CAPACITY", default_value_t = DEFAULT_SUBSCRIBER_CAPACITY)]
    pub subscriber_capacity: usize,

    /// `compact` or `json`.
    #[arg(long, env = "BIDSIFY_LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,
}

/// Resolved server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub static_dir: Option<PathBuf>,
    pub tool: ToolLocator,
    pub config_dir: Option<PathBuf>,
    pub max_jobs: usize,
    pub subscriber_capacity: usize,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            static_dir: None,
            tool: ToolLocator::default(),
            config_dir: None,
            max_jobs: DEFAULT_MAX_JOBS,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            log_format: LogFormat::default(),
        }
    }
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        let tool = match self.tool_script {
            Some(script) => ToolLocator::new(self.python, script),
            None => ToolLocator::discover(&self.tool_root, self.python),
        };
        ServerConfig {
            addr: SocketAddr::new(self.host, self.port),
            static_dir: resolve_static_dir(self.static_dir),
            tool,
            config_dir: self.config_dir,
            max_jobs: self.max_jobs,
            subscriber_capacity: self.subscriber_capacity,
            log_format: self.log_format,
        }
    }
}

/// Get the static directory for serving frontend files.
///
/// Priority:
/// 1. Explicit flag or STATIC_DIR environment variable
/// 2. ./web directory (if it exists)
/// 3. None (API-only mode)
fn resolve_static_dir(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let web = PathBuf::from(DEFAULT_STATIC_DIR);
        web.is_dir().then_some(web)
    })
}
