// crates/core/src/temp_config.rs
//! Temporary configuration files handed to the conversion tool.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::ConfigError;

const PREFIX: &str = "natmeg_config_";
const SUFFIX: &str = ".yml";

/// A configuration payload written to a uniquely named temp file.
///
/// The file is removed by [`TempConfig::release`]. A handle dropped without
/// being released (for example while unwinding from a panic) still removes
/// the file.
#[derive(Debug)]
pub struct TempConfig {
    file: NamedTempFile,
}

impl TempConfig {
    /// Write `contents` to a fresh temp file in the system temp directory.
    pub fn materialize(contents: &str) -> Result<Self, ConfigError> {
        Self::materialize_in(&std::env::temp_dir(), contents)
    }

    /// Write `contents` to a fresh temp file inside `dir`.
    pub fn materialize_in(dir: &Path, contents: &str) -> Result<Self, ConfigError> {
        let mut file = tempfile::Builder::new()
            .prefix(PREFIX)
            .suffix(SUFFIX)
            .tempfile_in(dir)
            .map_err(|source| ConfigError::Write { source })?;
        file.write_all(contents.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|source| ConfigError::Write { source })?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file. Consumes the handle so deletion happens once.
    pub fn release(self) -> Result<(), ConfigError> {
        let path = self.file.path().to_path_buf();
        self.file
            .close()
            .map_err(|source| ConfigError::Remove { path, source })
    }

    /// Delete the file, logging instead of returning a failure.
    pub fn release_logged(self) {
        let path: PathBuf = self.path().to_path_buf();
        match self.release() {
            Ok(()) => tracing::debug!(path = %path.display(), "Released temporary config"),
            Err(e) => tracing::warn!(error = %e, "Failed to release temporary config"),
        }
    }
}
