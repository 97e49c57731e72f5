//! Provider capability interfaces.
//!
//! Everything the lifecycle core needs from a concrete database is
//! expressed through these two traits. The core is written once against
//! them; a provider crate (SQLite, ...) implements them.

use crate::batch::IsolationLevel;
use crate::value::{ParameterCollection, SqlValue};

/// A live database connection.
///
/// Transactions are connection state: `begin` opens one, `commit` or
/// `rollback` closes it. The execution engine never nests them.
pub trait Connection: Send + 'static {
    /// Provider error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Begins a transaction, optionally at a specific isolation level.
    fn begin(&mut self, isolation_level: Option<IsolationLevel>) -> Result<(), Self::Error>;

    /// Commits the open transaction.
    fn commit(&mut self) -> Result<(), Self::Error>;

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> Result<(), Self::Error>;

    /// Executes a script and returns the number of affected rows.
    fn execute_non_query(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<u64, Self::Error>;

    /// Executes a script and returns the first column of the first row,
    /// or `Null` when it produces no rows.
    fn execute_scalar(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<SqlValue, Self::Error>;

    /// Executes a script and returns every row it produces.
    fn execute_reader(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<Vec<Vec<SqlValue>>, Self::Error>;
}

/// Opens connections to one database.
pub trait DatabaseProvider: Send + Sync + 'static {
    /// Connection type handed out by this provider.
    type Connection: Connection;

    /// Short provider name used in log output.
    fn name(&self) -> &'static str;

    /// Opens a new connection.
    fn connect(
        &self,
        read_only: bool,
    ) -> Result<Self::Connection, <Self::Connection as Connection>::Error>;

    /// Returns whether `connect(true)` yields a genuinely read-only
    /// connection.
    fn supports_read_only_connections(&self) -> bool {
        false
    }
}

/// Error type of a provider's connections.
pub type ProviderError<P> = <<P as DatabaseProvider>::Connection as Connection>::Error;
