//! In-memory provider used by the unit tests.
//!
//! Scripts are a tiny command language instead of SQL:
//!
//! - `SET VERSION <n>`: stores the schema version (buffered inside a
//!   transaction, applied on commit)
//! - `SELECT VERSION`: returns the schema version
//! - `ROWS <r> <c>`: returns `r` rows of `c` integer columns
//! - `PARAM <name>`: returns a parameter value
//! - `FAIL ...`: fails
//! - anything else: returns the script length and affects no rows

use std::sync::{Arc, Mutex, MutexGuard};

use crate::batch::IsolationLevel;
use crate::connection::{Connection, DatabaseProvider};
use crate::value::{ParameterCollection, SqlValue};

#[derive(Debug, thiserror::Error)]
#[error("mock failure: {0}")]
pub struct MockError(pub String);

#[derive(Debug, Default)]
pub struct MockDatabase {
    pub version: i64,
    pub log: Vec<String>,
    pub fail_connect: bool,
    pub connections: usize,
    pub read_only_connections: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    pub db: Arc<Mutex<MockDatabase>>,
}

impl MockProvider {
    pub fn with_version(version: i64) -> Self {
        let provider = Self::default();
        provider.state().version = version;
        provider
    }

    pub fn state(&self) -> MutexGuard<'_, MockDatabase> {
        self.db.lock().unwrap()
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }
}

impl DatabaseProvider for MockProvider {
    type Connection = MockConnection;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn connect(&self, read_only: bool) -> Result<MockConnection, MockError> {
        let mut state = self.state();
        if state.fail_connect {
            return Err(MockError("connection refused".into()));
        }
        state.connections += 1;
        if read_only {
            state.read_only_connections += 1;
        }
        Ok(MockConnection {
            db: Arc::clone(&self.db),
            in_transaction: false,
            pending_version: None,
        })
    }

    fn supports_read_only_connections(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct MockConnection {
    db: Arc<Mutex<MockDatabase>>,
    in_transaction: bool,
    pending_version: Option<i64>,
}

impl MockConnection {
    /// Creates a connection on a private database.
    pub fn detached() -> Self {
        Self {
            db: Arc::default(),
            in_transaction: false,
            pending_version: None,
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.db.lock().unwrap().log.clone()
    }

    pub fn version(&self) -> i64 {
        self.db.lock().unwrap().version
    }

    pub const fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn record(&self, entry: impl Into<String>) {
        self.db.lock().unwrap().log.push(entry.into());
    }

    fn run(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<Vec<Vec<SqlValue>>, MockError> {
        self.record(script);
        let words: Vec<&str> = script.split_whitespace().collect();
        match words.as_slice() {
            ["FAIL", ..] => Err(MockError(script.to_owned())),
            ["SET", "VERSION", version] => {
                let version = version
                    .parse()
                    .map_err(|_| MockError(format!("bad version in '{script}'")))?;
                if self.in_transaction {
                    self.pending_version = Some(version);
                } else {
                    self.db.lock().unwrap().version = version;
                }
                Ok(Vec::new())
            }
            ["SELECT", "VERSION"] => {
                let version = self
                    .pending_version
                    .unwrap_or_else(|| self.db.lock().unwrap().version);
                Ok(vec![vec![SqlValue::Int(version)]])
            }
            ["ROWS", rows, columns] => {
                let rows: i64 = rows.parse().map_err(|_| MockError("bad row count".into()))?;
                let columns: i64 = columns
                    .parse()
                    .map_err(|_| MockError("bad column count".into()))?;
                Ok((0..rows)
                    .map(|r| (0..columns).map(|c| SqlValue::Int(r * columns + c)).collect())
                    .collect())
            }
            ["PARAM", name] => Ok(vec![vec![parameters.get(name).cloned().unwrap_or_default()]]),
            _ => Ok(vec![vec![SqlValue::Int(script.len() as i64)]]),
        }
    }
}

impl Connection for MockConnection {
    type Error = MockError;

    fn begin(&mut self, isolation_level: Option<IsolationLevel>) -> Result<(), MockError> {
        match isolation_level {
            Some(level) => self.record(format!("BEGIN {level}")),
            None => self.record("BEGIN"),
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), MockError> {
        self.record("COMMIT");
        self.in_transaction = false;
        if let Some(version) = self.pending_version.take() {
            self.db.lock().unwrap().version = version;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), MockError> {
        self.record("ROLLBACK");
        self.in_transaction = false;
        self.pending_version = None;
        Ok(())
    }

    fn execute_non_query(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<u64, MockError> {
        let affected = u64::from(script.starts_with("SET VERSION"));
        self.run(script, parameters).map(|_| affected)
    }

    fn execute_scalar(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<SqlValue, MockError> {
        let rows = self.run(script, parameters)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or_default())
    }

    fn execute_reader(
        &mut self,
        script: &str,
        parameters: &ParameterCollection,
    ) -> Result<Vec<Vec<SqlValue>>, MockError> {
        self.run(script, parameters)
    }
}
