//! SQLite connection.

use std::sync::Arc;

use oxide_lifecycle::batch::IsolationLevel;
use oxide_lifecycle::connection::Connection;
use oxide_lifecycle::value::{ParameterCollection, SqlValue};
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteQueryResult, SqliteRow};
use sqlx::{Connection as _, Row, ValueRef};
use tracing::debug;

use crate::error::{Result, SqliteError};
use crate::params::{BoundScript, ParameterBinder};
use crate::runtime::SyncRuntime;

type Query<'q> = sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>;

/// A single SQLite connection driven synchronously.
///
/// The connection is closed when dropped.
pub struct SqliteDbConnection {
    connection: Option<SqliteConnection>,
    runtime: Arc<SyncRuntime>,
    binder: ParameterBinder,
    read_only: bool,
    read_uncommitted: bool,
}

impl SqliteDbConnection {
    pub(crate) fn new(
        connection: SqliteConnection,
        runtime: Arc<SyncRuntime>,
        binder: ParameterBinder,
        read_only: bool,
    ) -> Self {
        Self {
            connection: Some(connection),
            runtime,
            binder,
            read_only,
            read_uncommitted: false,
        }
    }

    /// Returns whether the connection was opened read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Closes the connection, waiting for the driver to release the file.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => Ok(self.runtime.block_on(connection.close())??),
            None => Ok(()),
        }
    }

    fn raw(&mut self, sql: &str) -> Result<SqliteQueryResult> {
        let connection = self.connection.as_mut().ok_or(SqliteError::Closed)?;
        Ok(self.runtime.block_on(sqlx::Executor::execute(connection, sqlx::raw_sql(sql)))??)
    }

    fn fetch_all(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<Vec<SqliteRow>> {
        let bound = self.binder.bind(script, parameters)?;
        let connection = self.connection.as_mut().ok_or(SqliteError::Closed)?;
        let rows = if bound.values.is_empty() {
            self.runtime
                .block_on(sqlx::Executor::fetch_all(connection, sqlx::raw_sql(script)))??
        } else {
            self.runtime.block_on(query(&bound).fetch_all(connection))??
        };
        Ok(rows)
    }

    fn execute(&mut self, script: &str, parameters: &ParameterCollection) -> Result<u64> {
        let bound = self.binder.bind(script, parameters)?;
        let connection = self.connection.as_mut().ok_or(SqliteError::Closed)?;
        let result = if bound.values.is_empty() {
            self.runtime
                .block_on(sqlx::Executor::execute(connection, sqlx::raw_sql(script)))??
        } else {
            self.runtime.block_on(query(&bound).execute(connection))??
        };
        Ok(result.rows_affected())
    }

    fn reset_read_uncommitted(&mut self) -> Result<()> {
        if self.read_uncommitted {
            self.read_uncommitted = false;
            self.raw("PRAGMA read_uncommitted = 0")?;
        }
        Ok(())
    }
}

impl Drop for SqliteDbConnection {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!(error = %err, "Failed to close connection");
        }
    }
}

impl Connection for SqliteDbConnection {
    type Error = SqliteError;

    fn begin(&mut self, isolation_level: Option<IsolationLevel>) -> Result<()> {
        let statement = match isolation_level {
            Some(
                IsolationLevel::RepeatableRead
                | IsolationLevel::Serializable
                | IsolationLevel::Snapshot,
            ) => "BEGIN IMMEDIATE",
            Some(IsolationLevel::ReadUncommitted) => {
                self.raw("PRAGMA read_uncommitted = 1")?;
                self.read_uncommitted = true;
                "BEGIN"
            }
            Some(IsolationLevel::ReadCommitted) | None => "BEGIN",
        };
        debug!(statement, "Beginning transaction");
        self.raw(statement)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.raw("COMMIT")?;
        self.reset_read_uncommitted()
    }

    fn rollback(&mut self) -> Result<()> {
        self.raw("ROLLBACK")?;
        self.reset_read_uncommitted()
    }

    fn execute_non_query(&mut self, script: &str, parameters: &ParameterCollection) -> Result<u64> {
        self.execute(script, parameters)
    }

    fn execute_scalar(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<SqlValue> {
        let rows = self.fetch_all(script, parameters)?;
        match rows.first() {
            Some(row) if !row.is_empty() => decode_value(row, 0),
            _ => Ok(SqlValue::Null),
        }
    }

    fn execute_reader(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<Vec<Vec<SqlValue>>> {
        self.fetch_all(script, parameters)?
            .iter()
            .map(decode_row)
            .collect()
    }
}

impl std::fmt::Debug for SqliteDbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDbConnection")
            .field("open", &self.connection.is_some())
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

fn query(bound: &BoundScript) -> Query<'_> {
    bound
        .values
        .iter()
        .fold(sqlx::query(&bound.sql), |query, value| bind_param(query, value.clone()))
}

fn bind_param(query: Query<'_>, value: SqlValue) -> Query<'_> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    }
}

fn decode_row(row: &SqliteRow) -> Result<Vec<SqlValue>> {
    (0..row.len()).map(|index| decode_value(row, index)).collect()
}

/// Decodes a column by the storage class of its value.
fn decode_value(row: &SqliteRow, index: usize) -> Result<SqlValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(SqlValue::Null);
    }
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Ok(SqlValue::Int(value));
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return Ok(SqlValue::Float(value));
    }
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Ok(SqlValue::Text(value));
    }
    Ok(SqlValue::Blob(row.try_get::<Vec<u8>, _>(index)?))
}
