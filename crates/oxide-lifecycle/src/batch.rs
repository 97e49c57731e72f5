//! Batches and commands.
//!
//! A [`Batch`] is the unit of work handed to the execution engine: an
//! ordered list of [`Command`]s plus one [`ParameterCollection`] shared by
//! all of them. Batches are single-use; cloning one yields a fresh,
//! unexecuted copy.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::{LifecycleError, Result, SharedError};
use crate::requirements;
use crate::value::{ParameterCollection, SqlValue, ToSqlValue};

/// What a command expects from the transaction of its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionRequirement {
    /// Runs either way.
    #[default]
    DontCare,
    /// Must run inside a transaction.
    Required,
    /// Must run outside a transaction (e.g. `VACUUM`).
    Disallowed,
}

impl FromStr for TransactionRequirement {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "dontcare" => Ok(Self::DontCare),
            "required" => Ok(Self::Required),
            "disallowed" => Ok(Self::Disallowed),
            other => Err(LifecycleError::InvalidConfiguration(format!(
                "unknown transaction requirement '{other}'"
            ))),
        }
    }
}

/// Transaction isolation level requested by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is read.
    ReadCommitted,
    /// Rows read stay stable for the transaction.
    RepeatableRead,
    /// Full serializability.
    Serializable,
    /// Snapshot isolation.
    Snapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadUncommitted => "read_uncommitted",
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
            Self::Snapshot => "snapshot",
        })
    }
}

impl FromStr for IsolationLevel {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "readuncommitted" => Ok(Self::ReadUncommitted),
            "readcommitted" => Ok(Self::ReadCommitted),
            "repeatableread" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(LifecycleError::InvalidConfiguration(format!(
                "unknown isolation level '{other}'"
            ))),
        }
    }
}

/// How a script command is executed and what gets captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    /// Every row and column is captured into `results`.
    Reader,
    /// The first column of the first row is captured into `result`.
    #[default]
    Scalar,
    /// The affected row count is captured into `result`.
    NonQuery,
}

impl FromStr for ExecutionType {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['_', ' ', '-'], "").as_str() {
            "reader" => Ok(Self::Reader),
            "scalar" => Ok(Self::Scalar),
            "nonquery" => Ok(Self::NonQuery),
            other => Err(LifecycleError::InvalidConfiguration(format!(
                "unknown execution type '{other}'"
            ))),
        }
    }
}

/// Value produced by a callback command.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CommandOutput {
    /// Nothing to capture.
    #[default]
    None,
    /// A single value.
    Value(SqlValue),
    /// An affected row count.
    Affected(u64),
    /// A result set.
    Rows(Vec<Vec<SqlValue>>),
}

/// What a callback command gets to work with.
pub struct CallbackContext<'a, C> {
    /// The live connection.
    pub connection: &'a mut C,
    /// Whether the batch runs inside a transaction.
    pub in_transaction: bool,
    /// Isolation level of that transaction, if one was requested.
    pub isolation_level: Option<IsolationLevel>,
    /// Parameters of the batch; changes are visible to later commands.
    pub parameters: &'a mut ParameterCollection,
}

/// Callback command body.
pub type CommandCallback<C> = Arc<
    dyn Fn(
            &mut CallbackContext<'_, C>,
        ) -> std::result::Result<CommandOutput, <C as Connection>::Error>
        + Send
        + Sync,
>;

/// The work a command performs.
pub enum CommandKind<C: Connection> {
    /// Opaque script text, interpreted by the provider.
    Script(String),
    /// Code run against the live connection.
    Callback(CommandCallback<C>),
}

impl<C: Connection> Clone for CommandKind<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Script(script) => Self::Script(script.clone()),
            Self::Callback(callback) => Self::Callback(Arc::clone(callback)),
        }
    }
}

impl<C: Connection> fmt::Debug for CommandKind<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(script) => f.debug_tuple("Script").field(script).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// One unit of work inside a batch, together with its outcome.
pub struct Command<C: Connection> {
    kind: CommandKind<C>,
    transaction_requirement: TransactionRequirement,
    isolation_level: Option<IsolationLevel>,
    execution_type: ExecutionType,
    was_executed: bool,
    result: Option<SqlValue>,
    results: Vec<SqlValue>,
    error: Option<String>,
    exception: Option<SharedError>,
}

impl<C: Connection> Command<C> {
    fn from_kind(kind: CommandKind<C>) -> Self {
        Self {
            kind,
            transaction_requirement: TransactionRequirement::DontCare,
            isolation_level: None,
            execution_type: ExecutionType::Scalar,
            was_executed: false,
            result: None,
            results: Vec::new(),
            error: None,
            exception: None,
        }
    }

    /// Creates a script command.
    #[must_use]
    pub fn script(script: impl Into<String>) -> Self {
        Self::from_kind(CommandKind::Script(script.into()))
    }

    /// Creates a callback command.
    #[must_use]
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&mut CallbackContext<'_, C>) -> std::result::Result<CommandOutput, C::Error>
            + Send
            + Sync
            + 'static,
    {
        Self::from_kind(CommandKind::Callback(Arc::new(callback)))
    }

    /// Sets the transaction requirement.
    #[must_use]
    pub fn transaction(mut self, requirement: TransactionRequirement) -> Self {
        self.transaction_requirement = requirement;
        self
    }

    /// Requests an isolation level.
    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Sets the execution type.
    #[must_use]
    pub fn execution(mut self, execution_type: ExecutionType) -> Self {
        self.execution_type = execution_type;
        self
    }

    /// Returns the work this command performs.
    #[must_use]
    pub const fn kind(&self) -> &CommandKind<C> {
        &self.kind
    }

    /// Returns the script text, if this is a script command.
    #[must_use]
    pub fn script_text(&self) -> Option<&str> {
        match &self.kind {
            CommandKind::Script(script) => Some(script),
            CommandKind::Callback(_) => None,
        }
    }

    /// Returns whether this is a callback command.
    #[must_use]
    pub const fn is_callback(&self) -> bool {
        matches!(self.kind, CommandKind::Callback(_))
    }

    #[must_use]
    pub const fn transaction_requirement(&self) -> TransactionRequirement {
        self.transaction_requirement
    }

    #[must_use]
    pub const fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }

    #[must_use]
    pub const fn execution_type(&self) -> ExecutionType {
        self.execution_type
    }

    /// Whether execution reached this command.
    #[must_use]
    pub const fn was_executed(&self) -> bool {
        self.was_executed
    }

    /// Captured scalar (or affected row count, or first reader value).
    #[must_use]
    pub const fn result(&self) -> Option<&SqlValue> {
        self.result.as_ref()
    }

    /// Captured reader values, flattened row by row.
    #[must_use]
    pub fn results(&self) -> &[SqlValue] {
        &self.results
    }

    /// Error message of a failed execution.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Provider error of a failed execution.
    #[must_use]
    pub const fn exception(&self) -> Option<&SharedError> {
        self.exception.as_ref()
    }

    /// Returns whether the command ran without error.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.was_executed && self.exception.is_none()
    }

    pub(crate) fn record_output(&mut self, output: CommandOutput) {
        self.was_executed = true;
        match output {
            CommandOutput::None => {
                self.result = Some(SqlValue::Null);
            }
            CommandOutput::Value(value) => {
                if self.execution_type == ExecutionType::Reader {
                    self.results = vec![value.clone()];
                }
                self.result = Some(value);
            }
            CommandOutput::Affected(count) => {
                self.result = Some(i64::try_from(count).unwrap_or(i64::MAX).to_sql_value());
            }
            CommandOutput::Rows(rows) => {
                self.results = rows.into_iter().flatten().collect();
                self.result = Some(self.results.first().cloned().unwrap_or_default());
            }
        }
    }

    pub(crate) fn record_failure(&mut self, exception: SharedError) {
        self.was_executed = true;
        self.error = Some(exception.to_string());
        self.exception = Some(exception);
    }
}

impl<C: Connection> Clone for Command<C> {
    /// Copies the command definition; the outcome is not copied.
    fn clone(&self) -> Self {
        let mut copy = Self::from_kind(self.kind.clone());
        copy.transaction_requirement = self.transaction_requirement;
        copy.isolation_level = self.isolation_level;
        copy.execution_type = self.execution_type;
        copy
    }
}

impl<C: Connection> fmt::Debug for Command<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind)
            .field("transaction_requirement", &self.transaction_requirement)
            .field("isolation_level", &self.isolation_level)
            .field("execution_type", &self.execution_type)
            .field("was_executed", &self.was_executed)
            .field("result", &self.result)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// An ordered, single-use sequence of commands.
pub struct Batch<C: Connection> {
    commands: Vec<Command<C>>,
    parameters: ParameterCollection,
}

impl<C: Connection> Default for Batch<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Batch<C> {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            parameters: ParameterCollection::new(),
        }
    }

    /// Adds a command.
    #[must_use]
    pub fn command(mut self, command: Command<C>) -> Self {
        self.commands.push(command);
        self
    }

    /// Adds a script command with default settings.
    #[must_use]
    pub fn script(self, script: impl Into<String>) -> Self {
        self.command(Command::script(script))
    }

    /// Sets a parameter (replacing an existing value).
    #[must_use]
    pub fn parameter(mut self, name: &str, value: impl ToSqlValue) -> Self {
        self.parameters.set(name, value);
        self
    }

    /// Appends a command.
    pub fn push(&mut self, command: Command<C>) {
        self.commands.push(command);
    }

    /// Appends several commands.
    pub fn extend(&mut self, commands: impl IntoIterator<Item = Command<C>>) {
        self.commands.extend(commands);
    }

    #[must_use]
    pub fn commands(&self) -> &[Command<C>] {
        &self.commands
    }

    #[must_use]
    pub const fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns whether the batch has no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// See [`requirements::requires_transaction`].
    pub fn requires_transaction(&self) -> Result<bool> {
        requirements::requires_transaction(
            self.commands.iter().map(Command::transaction_requirement),
        )
    }

    /// See [`requirements::disallows_transaction`].
    pub fn disallows_transaction(&self) -> Result<bool> {
        requirements::disallows_transaction(
            self.commands.iter().map(Command::transaction_requirement),
        )
    }

    /// See [`requirements::required_isolation_level`].
    pub fn required_isolation_level(&self) -> Result<Option<IsolationLevel>> {
        requirements::required_isolation_level(self.commands.iter().map(Command::isolation_level))
    }

    /// Returns whether every command was executed without error.
    #[must_use]
    pub fn was_successful(&self) -> bool {
        self.commands.iter().all(Command::succeeded)
    }

    /// Returns the first failed command and its position.
    #[must_use]
    pub fn failed_command(&self) -> Option<(usize, &Command<C>)> {
        self.commands
            .iter()
            .enumerate()
            .find(|(_, command)| command.exception.is_some())
    }

    /// Result of the last command that was executed.
    #[must_use]
    pub fn last_result(&self) -> Option<&SqlValue> {
        self.commands
            .iter()
            .rev()
            .find(|command| command.was_executed)
            .and_then(Command::result)
    }

    /// Splits the batch into its commands and parameters for execution.
    pub(crate) fn parts_mut(&mut self) -> (&mut [Command<C>], &mut ParameterCollection) {
        (&mut self.commands, &mut self.parameters)
    }
}

impl<C: Connection> Clone for Batch<C> {
    /// Deep copy of the definition and parameters; outcomes are reset.
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl<C: Connection> fmt::Debug for Batch<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("commands", &self.commands)
            .field("parameters", &self.parameters)
            .finish()
    }
}
