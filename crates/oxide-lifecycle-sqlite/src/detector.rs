//! SQLite version detection.

use std::fs;
use std::io;

use oxide_lifecycle::batch::Batch;
use oxide_lifecycle::context::ManagerContext;
use oxide_lifecycle::error::{LifecycleError, Result};
use oxide_lifecycle::strategy::{Detection, VersionDetector};
use oxide_lifecycle::value::SqlValue;
use tracing::{debug, warn};

use crate::provider::SqliteProvider;

/// Reads the schema version, by default from `PRAGMA user_version`.
///
/// A missing or empty database file is a new database and is not opened.
/// When a batch named by `version_batch_name` exists it is run instead of
/// the pragma; the result of its last command is the version.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteVersionDetector;

impl SqliteVersionDetector {
    /// Creates a detector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl VersionDetector<SqliteProvider> for SqliteVersionDetector {
    fn detect(&self, context: &ManagerContext<SqliteProvider>) -> Result<Detection> {
        let path = context.provider().path();
        match fs::metadata(path) {
            Ok(metadata) if metadata.len() == 0 => {
                debug!(path = %path.display(), "Database file is empty");
                return Ok(Detection::new_database());
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Database file does not exist");
                return Ok(Detection::new_database());
            }
            Err(source) => {
                return Err(LifecycleError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        let name = context.options().version_batch_name.as_str();
        let mut batch = if context.has_batch(name) {
            context.batch(name)?
        } else {
            Batch::new().script("PRAGMA user_version")
        };
        let use_transaction = batch.requires_transaction()?;
        if !context.execute_batch_with(true, &mut batch, use_transaction, false)? {
            warn!(path = %path.display(), "Failed to read schema version");
            return Ok(Detection::invalid());
        }

        match batch.last_result().and_then(SqlValue::as_i64) {
            Some(version) => Ok(Detection::version(version)),
            None => {
                warn!(result = ?batch.last_result(), "Schema version is not an integer");
                Ok(Detection::invalid())
            }
        }
    }
}
