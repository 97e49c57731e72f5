//! SQLite provider configuration.

use std::fs;
use std::path::{Path, PathBuf};

use oxide_lifecycle::error::{LifecycleError, Result};
use oxide_lifecycle::options::LifecycleOptions;
use serde::{Deserialize, Serialize};

/// Configuration for a SQLite-backed manager.
///
/// ```json
/// {
///     "database": "app.db",
///     "busy_timeout_ms": 5000,
///     "scripts": "sql",
///     "create_batch_name": "Create"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    /// Database file.
    pub database: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Directory of `*.sql` batch scripts.
    pub scripts: Option<PathBuf>,
    /// Batch naming conventions.
    #[serde(flatten)]
    pub lifecycle: LifecycleOptions,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            database: PathBuf::from("db.sqlite3"),
            busy_timeout_ms: 5000,
            scripts: None,
            lifecycle: LifecycleOptions::default(),
        }
    }
}

impl SqliteOptions {
    /// Options for the database at `database`, everything else default.
    #[must_use]
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Sets the script directory.
    #[must_use]
    pub fn scripts(mut self, scripts: impl Into<PathBuf>) -> Self {
        self.scripts = Some(scripts.into());
        self
    }

    /// Parses options from JSON.
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SqliteOptions::default();
        assert_eq!(options.database, PathBuf::from("db.sqlite3"));
        assert_eq!(options.busy_timeout_ms, 5000);
        assert!(options.scripts.is_none());
    }

    #[test]
    fn test_from_json_flattened() {
        let options = SqliteOptions::from_json(
            r#"{"database": "app.db", "scripts": "sql", "version_batch_name": "SchemaVersion"}"#,
        )
        .unwrap();
        assert_eq!(options.database, PathBuf::from("app.db"));
        assert_eq!(options.scripts, Some(PathBuf::from("sql")));
        assert_eq!(options.lifecycle.version_batch_name, "SchemaVersion");
        assert_eq!(options.lifecycle.create_batch_name, "Create");
    }

    #[test]
    fn test_builder() {
        let options = SqliteOptions::new("a.db").scripts("sql");
        assert_eq!(options.scripts, Some(PathBuf::from("sql")));
        assert_eq!(options.lifecycle, LifecycleOptions::default());
    }
}
