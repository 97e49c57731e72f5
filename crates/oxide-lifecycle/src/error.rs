//! Error types for the lifecycle manager.
//!
//! Only contract violations and, when a caller explicitly asks for it,
//! operational failures travel through [`LifecycleError`]. Ordinary
//! operational failures are reported as `Ok(false)`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::batch::IsolationLevel;
use crate::state::State;

/// Type-erased provider error, shared between a failed command and the
/// error returned to a caller that asked for failures to be raised.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while managing a database lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// `initialize` was called on a manager that is already initialized.
    #[error("Database manager is already initialized (state: {0})")]
    AlreadyInitialized(State),

    /// An operation was requested in a state that does not permit it.
    #[error("Operation '{operation}' is not allowed in state {state}")]
    InvalidOperation {
        /// The rejected operation.
        operation: &'static str,
        /// The state the manager was in.
        state: State,
    },

    /// A batch mixes commands that require and disallow a transaction.
    #[error("Batch contains commands that both require and disallow a transaction")]
    TransactionConflict,

    /// A batch mixes commands with different isolation levels.
    #[error("Batch contains conflicting isolation levels: {first} and {second}")]
    IsolationLevelConflict {
        /// The first isolation level encountered.
        first: IsolationLevel,
        /// The conflicting level.
        second: IsolationLevel,
    },

    /// Upgrade steps do not form a contiguous run of source versions.
    #[error("Upgrade steps are not contiguous: version {next} follows version {previous}")]
    NonContiguousVersions {
        /// The preceding source version.
        previous: i64,
        /// The following source version (equal to `previous` for duplicates).
        next: i64,
    },

    /// A source version outside `[min, max)` was passed to the upgrader.
    #[error("Source version {version} is outside the upgradeable range [{min}, {max})")]
    VersionOutOfRange {
        /// The requested source version.
        version: i64,
        /// Lowest upgradeable version.
        min: i64,
        /// Highest reachable version.
        max: i64,
    },

    /// `upgrade_to` was given a target that cannot be reached.
    #[error("Cannot upgrade from version {version} to {target} (highest reachable: {max})")]
    InvalidTargetVersion {
        /// The requested target.
        target: i64,
        /// The current version.
        version: i64,
        /// Highest reachable version.
        max: i64,
    },

    /// A batch name was registered twice.
    #[error("Batch '{0}' is already registered")]
    DuplicateBatchName(String),

    /// A parameter name was added twice to the same collection.
    #[error("Parameter '{0}' is already defined")]
    DuplicateParameter(String),

    /// No locator knows a batch with this name.
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// A backup/restore strategy does not handle this kind of location.
    #[error("Unsupported backup location: {0}")]
    UnsupportedLocation(String),

    /// Invalid configuration (bad pattern, unparsable version, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A script could not be split into commands.
    #[error("Invalid script '{name}': {message}")]
    InvalidScript {
        /// Name of the script.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// A command failed and the caller asked for failures to be raised.
    #[error("Command {index} failed: {source}")]
    CommandFailed {
        /// Zero-based position of the failed command in its batch.
        index: usize,
        /// The provider error.
        #[source]
        source: SharedError,
    },

    /// A connection could not be opened.
    #[error("Connection failed: {source}")]
    Connection {
        /// The provider error.
        #[source]
        source: SharedError,
    },

    /// Beginning or committing a transaction failed.
    #[error("Transaction failed: {source}")]
    Transaction {
        /// The provider error.
        #[source]
        source: SharedError,
    },

    /// IO error (reading script directories, configuration files).
    #[error("IO error on '{path}': {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LifecycleError {
    /// Wraps a provider error as a shared error object.
    pub fn shared<E>(error: E) -> SharedError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Arc::new(error)
    }

    /// Returns whether this error signals caller misuse rather than an
    /// environment/database failure.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        !matches!(
            self,
            Self::CommandFailed { .. }
                | Self::Connection { .. }
                | Self::Transaction { .. }
                | Self::Io { .. }
        )
    }
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
