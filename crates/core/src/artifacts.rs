// crates/core/src/artifacts.rs
//! Discovery of result files written by the conversion tool.

use std::path::PathBuf;

use crate::config::{ToolConfig, RESULTS_FILE};
use crate::error::ResolveError;

/// Computes which result files a finished job produced.
///
/// Implementations do synchronous filesystem checks and should be called from
/// `tokio::task::spawn_blocking`.
pub trait ArtifactResolver: Send + Sync {
    /// Existing artifact paths, in a stable order. A missing configuration
    /// yields an empty list.
    fn resolve(&self, config: Option<&ToolConfig>) -> Result<Vec<PathBuf>, ResolveError>;
}

/// Looks for the conversion table and results summary in the project's
/// `logs/` directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectLogsResolver;

impl ProjectLogsResolver {
    /// Paths the tool is expected to write, whether or not they exist.
    pub fn expected(config: &ToolConfig) -> Vec<PathBuf> {
        match config.logs_dir() {
            Some(logs) => vec![logs.join(config.conversion_file()), logs.join(RESULTS_FILE)],
            None => Vec::new(),
        }
    }
}

impl ArtifactResolver for ProjectLogsResolver {
    fn resolve(&self, config: Option<&ToolConfig>) -> Result<Vec<PathBuf>, ResolveError> {
        let Some(config) = config else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for path in Self::expected(config) {
            match path.try_exists() {
                Ok(true) => found.push(path),
                Ok(false) => {}
                Err(source) => return Err(ResolveError::Io { path, source }),
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CONVERSION_FILE;

    fn config_for(root: &std::path::Path, extra: &str) -> ToolConfig {
        ToolConfig::parse(&format!(
            "Project:\n  Root: {}\n  Name: study\n{extra}",
            root.display()
        ))
        .unwrap()
    }

    #[test]
    fn test_no_config_yields_empty() {
        assert!(ProjectLogsResolver.resolve(None).unwrap().is_empty());
    }

    #[test]
    fn test_incomplete_project_yields_empty() {
        let cfg = ToolConfig::parse("Project:\n  Name: study\n").unwrap();
        assert!(ProjectLogsResolver.resolve(Some(&cfg)).unwrap().is_empty());
    }

    #[test]
    fn test_only_existing_files_reported_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("study").join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join(RESULTS_FILE), "{}").unwrap();

        let cfg = config_for(dir.path(), "");
        let found = ProjectLogsResolver.resolve(Some(&cfg)).unwrap();
        assert_eq!(found, vec![logs.join(RESULTS_FILE)]);

        std::fs::write(logs.join(DEFAULT_CONVERSION_FILE), "a\tb\n").unwrap();
        let found = ProjectLogsResolver.resolve(Some(&cfg)).unwrap();
        assert_eq!(
            found,
            vec![logs.join(DEFAULT_CONVERSION_FILE), logs.join(RESULTS_FILE)]
        );
    }

    #[test]
    fn test_custom_conversion_file() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("study").join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("custom.tsv"), "").unwrap();

        let cfg = config_for(dir.path(), "BIDS:\n  Conversion_file: custom.tsv\n");
        let found = ProjectLogsResolver.resolve(Some(&cfg)).unwrap();
        assert_eq!(found, vec![logs.join("custom.tsv")]);
    }

    #[test]
    fn test_expected_paths() {
        let cfg = ToolConfig::parse("Project:\n  Root: /r\n  Name: n\n").unwrap();
        assert_eq!(
            ProjectLogsResolver::expected(&cfg),
            vec![
                PathBuf::from("/r/n/logs").join(DEFAULT_CONVERSION_FILE),
                PathBuf::from("/r/n/logs").join(RESULTS_FILE),
            ]
        );
    }
}
