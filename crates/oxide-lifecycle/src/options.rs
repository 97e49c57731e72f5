//! Manager configuration.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};
use crate::script::ScriptParser;

/// Name of the capture group holding the source version in
/// [`LifecycleOptions::upgrade_batch_pattern`].
pub const SOURCE_VERSION_GROUP: &str = "sourceVersion";

/// Batch naming conventions used by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleOptions {
    /// Regex selecting upgrade batches; must capture `sourceVersion`.
    pub upgrade_batch_pattern: String,
    /// Batch run by `create`.
    pub create_batch_name: String,
    /// Batch run by batch-driven cleanup processors.
    pub cleanup_batch_name: String,
    /// Batch run by batch-driven version detectors.
    pub version_batch_name: String,
    /// Line separating commands in script files.
    pub script_separator: String,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            upgrade_batch_pattern: r"^Upgrade(?P<sourceVersion>\d+)$".to_string(),
            create_batch_name: "Create".to_string(),
            cleanup_batch_name: "Cleanup".to_string(),
            version_batch_name: "Version".to_string(),
            script_separator: "GO".to_string(),
        }
    }
}

impl LifecycleOptions {
    /// Parses options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads options from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| LifecycleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Compiles the upgrade pattern, checking that it captures
    /// `sourceVersion`.
    pub fn upgrade_pattern(&self) -> Result<Regex> {
        let pattern = Regex::new(&self.upgrade_batch_pattern).map_err(|err| {
            LifecycleError::InvalidConfiguration(format!("upgrade batch pattern: {err}"))
        })?;
        if !pattern
            .capture_names()
            .any(|name| name == Some(SOURCE_VERSION_GROUP))
        {
            return Err(LifecycleError::InvalidConfiguration(format!(
                "upgrade batch pattern '{}' has no '{SOURCE_VERSION_GROUP}' group",
                self.upgrade_batch_pattern
            )));
        }
        Ok(pattern)
    }

    /// Returns a script parser using the configured separator.
    #[must_use]
    pub fn script_parser(&self) -> ScriptParser {
        ScriptParser::new(&self.script_separator)
    }
}
