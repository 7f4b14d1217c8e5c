// crates/core/src/config.rs
//! Typed subset of the conversion tool's YAML configuration.
//!
//! Only the fields the server needs to locate output artifacts are modelled.
//! Every field is optional and each section is parsed independently, so a
//! malformed `BIDS` block does not hide a usable `Project` block.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Conversion table name used when `BIDS.Conversion_file` is absent.
pub const DEFAULT_CONVERSION_FILE: &str = "bids_conversion.tsv";

/// Results summary the tool writes next to the conversion table.
pub const RESULTS_FILE: &str = "bids_results.json";

/// Directory under the project root holding the tool's logs and tables.
pub const LOGS_DIR: &str = "logs";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(rename = "Root", default, deserialize_with = "scalar_string")]
    pub root: Option<String>,
    #[serde(rename = "Name", default, deserialize_with = "scalar_string")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidsSection {
    #[serde(rename = "Conversion_file", default, deserialize_with = "scalar_string")]
    pub conversion_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolConfig {
    #[serde(rename = "Project")]
    pub project: Option<ProjectSection>,
    #[serde(rename = "BIDS")]
    pub bids: Option<BidsSection>,
}

impl ToolConfig {
    /// Parse configuration text.
    ///
    /// Fails only when the text is not YAML or its top level is not a mapping.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Malformed {
                message: e.to_string(),
            })?;

        let map = match doc {
            serde_yaml::Value::Mapping(map) => map,
            serde_yaml::Value::Null => return Ok(Self::default()),
            other => {
                return Err(ConfigError::Malformed {
                    message: format!("expected a mapping at top level, found {}", kind(&other)),
                })
            }
        };

        Ok(Self {
            project: section(&map, "Project"),
            bids: section(&map, "BIDS"),
        })
    }

    /// Like [`ToolConfig::parse`], but logs and swallows the error.
    pub fn parse_lenient(text: &str) -> Option<Self> {
        match Self::parse(text) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unparseable tool configuration");
                None
            }
        }
    }

    /// `<Project.Root>/<Project.Name>`, when both are present and non-empty.
    pub fn project_dir(&self) -> Option<PathBuf> {
        let project = self.project.as_ref()?;
        let root = project.root.as_deref().filter(|s| !s.is_empty())?;
        let name = project.name.as_deref().filter(|s| !s.is_empty())?;
        Some(PathBuf::from(root).join(name))
    }

    pub fn logs_dir(&self) -> Option<PathBuf> {
        self.project_dir().map(|dir| dir.join(LOGS_DIR))
    }

    pub fn conversion_file(&self) -> &str {
        self.bids
            .as_ref()
            .and_then(|b| b.conversion_file.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CONVERSION_FILE)
    }
}

fn section<T: for<'de> Deserialize<'de>>(map: &serde_yaml::Mapping, key: &str) -> Option<T> {
    let value = map.get(key)?;
    match serde_yaml::from_value(value.clone()) {
        Ok(section) => Some(section),
        Err(e) => {
            tracing::debug!(section = key, error = %e, "Skipping malformed config section");
            None
        }
    }
}

fn kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

/// Accept strings, numbers and booleans; `Name: 2024` is a valid project name.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        Some(serde_yaml::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}
