//! SQLite support for `oxide-lifecycle`.
//!
//! Provides a [`DatabaseProvider`](oxide_lifecycle::connection::DatabaseProvider)
//! over single `sqlx` SQLite connections, driven synchronously, together with
//! SQLite strategies for the lifecycle manager:
//! - **Detector** - Reads `PRAGMA user_version` (or a `Version` batch)
//! - **Cleanup** - `VACUUM`, `ANALYZE` and `PRAGMA optimize`
//! - **Backup** - `VACUUM INTO` a file, restore by copying it back
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_lifecycle_sqlite::{SqliteOptions, sqlite_manager};
//!
//! let options = SqliteOptions::new("app.db").scripts("sql");
//! let mut manager = sqlite_manager(&options)?;
//! manager.initialize()?;
//!
//! if manager.can_upgrade() {
//!     manager.upgrade()?;
//! }
//! ```

pub mod backup;
pub mod cleanup;
pub mod connection;
pub mod detector;
pub mod error;
pub mod options;
pub mod params;
pub mod provider;

mod runtime;

use std::time::Duration;

use oxide_lifecycle::error::{LifecycleError, Result};
use oxide_lifecycle::locator::DirectoryBatchLocator;
use oxide_lifecycle::manager::{DatabaseManager, ManagerBuilder};

pub use backup::{SqliteBackupCreator, timestamped_backup_path};
pub use cleanup::SqliteCleanupProcessor;
pub use connection::SqliteDbConnection;
pub use detector::SqliteVersionDetector;
pub use error::SqliteError;
pub use options::SqliteOptions;
pub use provider::SqliteProvider;

/// A manager builder wired with the SQLite provider and strategies.
///
/// Scripts in `options.scripts` are registered as batches; more locators
/// can be added before building.
pub fn sqlite_manager_builder(options: &SqliteOptions) -> Result<ManagerBuilder<SqliteProvider>> {
    let provider = SqliteProvider::new(&options.database)
        .map_err(|err| LifecycleError::Connection {
            source: LifecycleError::shared(err),
        })?
        .busy_timeout(Duration::from_millis(options.busy_timeout_ms));

    let mut builder = DatabaseManager::builder(provider, SqliteVersionDetector::new())
        .options(options.lifecycle.clone())
        .cleanup(SqliteCleanupProcessor::new())
        .backup(SqliteBackupCreator::new());

    if let Some(scripts) = &options.scripts {
        let parser = options.lifecycle.script_parser();
        builder = builder.locator(DirectoryBatchLocator::<SqliteDbConnection>::load(
            scripts, &parser,
        )?);
    }
    Ok(builder)
}

/// Builds a SQLite manager. Call `initialize` before using it.
pub fn sqlite_manager(options: &SqliteOptions) -> Result<DatabaseManager<SqliteProvider>> {
    sqlite_manager_builder(options)?.build()
}
