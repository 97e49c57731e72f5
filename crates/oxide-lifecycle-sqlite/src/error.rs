//! Error types for the SQLite provider.

/// Errors raised by SQLite connections.
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// Error reported by the SQLite driver.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (database, backup or journal files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The async runtime could not be started.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A script references a parameter the batch does not define.
    #[error("Missing parameter '{0}'")]
    MissingParameter(String),

    /// The connection was already closed.
    #[error("Connection is closed")]
    Closed,
}

/// Result type for SQLite provider operations.
pub type Result<T> = std::result::Result<T, SqliteError>;
