// crates/core/src/tool.rs
//! Locating the conversion tool and building its command line.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::JobAction;

/// Script name looked up under the tool root.
pub const TOOL_SCRIPT: &str = "bidsify.py";

/// Interpreter used when none is configured.
pub const DEFAULT_PYTHON: &str = "python3";

/// A program plus its arguments, ready to be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Program followed by arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Resolved interpreter and script for the conversion tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLocator {
    python: String,
    script: PathBuf,
}

impl ToolLocator {
    pub fn new(python: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            script: script.into(),
        }
    }

    /// Find the script under `root`.
    ///
    /// Priority:
    /// 1. `<root>/bidsify.py`
    /// 2. `<root>/electron/bidsify.py` (bundled desktop layout)
    /// 3. bare `bidsify.py`, resolved by the interpreter against its cwd
    pub fn discover(root: &Path, python: impl Into<String>) -> Self {
        let candidates = [root.join(TOOL_SCRIPT), root.join("electron").join(TOOL_SCRIPT)];
        let script = candidates
            .into_iter()
            .find(|p| p.is_file())
            .unwrap_or_else(|| {
                tracing::warn!(
                    root = %root.display(),
                    "Conversion script not found under tool root, relying on working directory"
                );
                PathBuf::from(TOOL_SCRIPT)
            });
        Self::new(python, script)
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// `<python> <script> --config <path> [action flags]`
    pub fn command(&self, config_path: &Path, action: JobAction) -> ToolCommand {
        let mut args = vec![
            self.script.to_string_lossy().into_owned(),
            "--config".to_string(),
            config_path.to_string_lossy().into_owned(),
        ];
        args.extend(action.tool_flags().iter().map(|f| f.to_string()));
        ToolCommand::new(self.python.clone(), args)
    }
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::new(DEFAULT_PYTHON, TOOL_SCRIPT)
    }
}
