//! SQLite database provider.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use oxide_lifecycle::connection::DatabaseProvider;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection as _;
use tracing::debug;

use crate::connection::SqliteDbConnection;
use crate::error::Result;
use crate::params::ParameterBinder;
use crate::runtime::SyncRuntime;

/// Default time a connection waits for a lock held by another connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens connections to one SQLite database file.
///
/// Read-write connections create the file if it does not exist; read-only
/// connections require it to exist.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    path: PathBuf,
    busy_timeout: Duration,
    runtime: Arc<SyncRuntime>,
    binder: ParameterBinder,
}

impl SqliteProvider {
    /// Creates a provider for the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            runtime: Arc::new(SyncRuntime::new()?),
            binder: ParameterBinder::new(),
        })
    }

    /// Sets the busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect_options(&self, read_only: bool) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(!read_only)
            .read_only(read_only)
            .busy_timeout(self.busy_timeout)
    }
}

impl DatabaseProvider for SqliteProvider {
    type Connection = SqliteDbConnection;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connect(&self, read_only: bool) -> Result<SqliteDbConnection> {
        debug!(path = %self.path.display(), read_only, "Connecting to SQLite database");
        let options = self.connect_options(read_only);
        let connection = self
            .runtime
            .block_on(SqliteConnection::connect_with(&options))??;
        Ok(SqliteDbConnection::new(
            connection,
            Arc::clone(&self.runtime),
            self.binder.clone(),
            read_only,
        ))
    }

    fn supports_read_only_connections(&self) -> bool {
        true
    }
}
