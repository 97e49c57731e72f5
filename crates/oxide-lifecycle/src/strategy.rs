//! Provider-specific strategies the manager delegates to.
//!
//! A manager always has a [`VersionDetector`]; [`CleanupProcessor`] and
//! [`BackupCreator`] are optional and their absence shows up as the
//! corresponding `supports_*` flag being false.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::connection::DatabaseProvider;
use crate::context::ManagerContext;
use crate::error::Result;
use crate::state::{State, VERSION_INVALID, VERSION_NEW};

/// What a version detector found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Explicit state; `None` lets the manager derive it from the version.
    pub state: Option<State>,
    /// Detected schema version.
    pub version: i64,
}

impl Detection {
    /// A detected version; the state is derived by the manager.
    #[must_use]
    pub const fn version(version: i64) -> Self {
        Self {
            state: None,
            version,
        }
    }

    /// A database that does not hold a schema yet.
    #[must_use]
    pub const fn new_database() -> Self {
        Self {
            state: Some(State::New),
            version: VERSION_NEW,
        }
    }

    /// A database whose version cannot be determined.
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            state: Some(State::Invalid),
            version: VERSION_INVALID,
        }
    }
}

/// Determines the schema version of a database.
pub trait VersionDetector<P: DatabaseProvider>: Send + Sync {
    /// Inspects the database. An error is treated as an invalid database.
    fn detect(&self, context: &ManagerContext<P>) -> Result<Detection>;
}

/// Performs maintenance on a database.
pub trait CleanupProcessor<P: DatabaseProvider>: Send + Sync {
    /// Runs the cleanup; operational failures return `Ok(false)`.
    fn cleanup(&self, context: &ManagerContext<P>) -> Result<bool>;
}

/// Where a backup is written to or restored from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupLocation {
    /// A file on the local filesystem.
    File(PathBuf),
    /// A provider-defined named location (backup device, bucket key, ...).
    Named(String),
}

impl From<PathBuf> for BackupLocation {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for BackupLocation {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl fmt::Display for BackupLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Creates and restores backups.
pub trait BackupCreator<P: DatabaseProvider>: Send + Sync {
    /// Whether `backup` is implemented.
    fn supports_backup(&self) -> bool {
        true
    }

    /// Whether `restore` is implemented.
    fn supports_restore(&self) -> bool {
        true
    }

    /// Writes a backup to `target`.
    fn backup(&self, context: &ManagerContext<P>, target: &BackupLocation) -> Result<bool>;

    /// Replaces the database with the backup at `source`.
    fn restore(&self, context: &ManagerContext<P>, source: &BackupLocation) -> Result<bool>;
}

/// Detects the version by running a named batch; the result of its last
/// executed command is the version.
#[derive(Debug, Clone, Default)]
pub struct BatchVersionDetector {
    batch_name: Option<String>,
}

impl BatchVersionDetector {
    /// Uses the batch named by `LifecycleOptions::version_batch_name`.
    #[must_use]
    pub const fn new() -> Self {
        Self { batch_name: None }
    }

    /// Uses the batch `name` instead.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            batch_name: Some(name.into()),
        }
    }
}

impl<P: DatabaseProvider> VersionDetector<P> for BatchVersionDetector {
    fn detect(&self, context: &ManagerContext<P>) -> Result<Detection> {
        let name = self
            .batch_name
            .as_deref()
            .unwrap_or(context.options().version_batch_name.as_str());
        let mut batch = context.batch(name)?;
        let use_transaction = batch.requires_transaction()?;
        if !context.execute_batch_with(true, &mut batch, use_transaction, false)? {
            warn!(batch = name, "Version batch failed");
            return Ok(Detection::invalid());
        }
        match batch.last_result().and_then(crate::value::SqlValue::as_i64) {
            Some(version) => {
                debug!(batch = name, version, "Detected version");
                Ok(Detection::version(version))
            }
            None => {
                warn!(
                    batch = name,
                    result = ?batch.last_result(),
                    "Version batch returned no integer"
                );
                Ok(Detection::invalid())
            }
        }
    }
}

/// Cleans up by running a named batch, in a transaction unless the batch
/// disallows one.
#[derive(Debug, Clone, Default)]
pub struct BatchCleanupProcessor {
    batch_name: Option<String>,
}

impl BatchCleanupProcessor {
    /// Uses the batch named by `LifecycleOptions::cleanup_batch_name`.
    #[must_use]
    pub const fn new() -> Self {
        Self { batch_name: None }
    }

    /// Uses the batch `name` instead.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            batch_name: Some(name.into()),
        }
    }
}

impl<P: DatabaseProvider> CleanupProcessor<P> for BatchCleanupProcessor {
    fn cleanup(&self, context: &ManagerContext<P>) -> Result<bool> {
        let name = self
            .batch_name
            .as_deref()
            .unwrap_or(context.options().cleanup_batch_name.as_str());
        let mut batch = context.batch(name)?;
        context.apply_batch(&mut batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleError;
    use crate::locator::DictionaryBatchLocator;
    use crate::options::LifecycleOptions;
    use crate::testing::MockProvider;
    use std::sync::Arc;

    fn context(provider: &MockProvider, scripts: &[(&str, &str)]) -> ManagerContext<MockProvider> {
        let context = ManagerContext::new(provider.clone(), LifecycleOptions::default());
        let mut locator = DictionaryBatchLocator::new();
        for (name, script) in scripts {
            locator.add_script(*name, script).unwrap();
        }
        context.locator().register(Arc::new(locator)).unwrap();
        context
    }

    #[test]
    fn test_batch_detector() {
        let provider = MockProvider::with_version(4);
        let context = context(&provider, &[("Version", "SELECT VERSION")]);
        let detection = BatchVersionDetector::new().detect(&context).unwrap();
        assert_eq!(detection, Detection::version(4));
        assert_eq!(provider.state().read_only_connections, 1);
    }

    #[test]
    fn test_batch_detector_failure_is_invalid() {
        let provider = MockProvider::default();
        let context = context(&provider, &[("Broken", "FAIL broken"), ("Text", "PARAM missing")]);
        assert_eq!(
            BatchVersionDetector::named("Broken").detect(&context).unwrap(),
            Detection::invalid()
        );
        assert_eq!(
            BatchVersionDetector::named("Text").detect(&context).unwrap(),
            Detection::invalid()
        );
    }

    #[test]
    fn test_batch_detector_missing_batch() {
        let provider = MockProvider::default();
        let context = context(&provider, &[]);
        assert!(matches!(
            BatchVersionDetector::new().detect(&context),
            Err(LifecycleError::BatchNotFound(_))
        ));
    }

    #[test]
    fn test_batch_cleanup() {
        let provider = MockProvider::default();
        let context = context(
            &provider,
            &[("Cleanup", "-- @transaction: disallowed\nVACUUM\nGO\nANALYZE")],
        );
        assert!(BatchCleanupProcessor::new().cleanup(&context).unwrap());
        assert_eq!(provider.log(), ["VACUUM", "ANALYZE"]);
    }

    #[test]
    fn test_backup_location() {
        let location = BackupLocation::from(Path::new("/tmp/db.bak"));
        assert_eq!(location, BackupLocation::File(PathBuf::from("/tmp/db.bak")));
        assert_eq!(location.to_string(), "/tmp/db.bak");
        assert_eq!(BackupLocation::Named("nightly".into()).to_string(), "nightly");
    }
}
