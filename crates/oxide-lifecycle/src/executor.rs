//! Batch executor.
//!
//! This module runs a [`Batch`] against a live connection: it resolves the
//! batch's transaction requirements, wraps the commands in at most one
//! transaction, dispatches each command by its execution type and records
//! the outcome on the command.

use tracing::{debug, info, warn};

use crate::batch::{
    Batch, CallbackContext, Command, CommandKind, CommandOutput, ExecutionType, IsolationLevel,
};
use crate::connection::Connection;
use crate::error::{LifecycleError, Result, SharedError};
use crate::value::ParameterCollection;

/// Rolls back an open transaction unless it was committed.
///
/// Every exit path out of the executor, including a panicking callback,
/// passes through `Drop`.
struct TransactionGuard<'c, C: Connection> {
    connection: &'c mut C,
    open: bool,
}

impl<'c, C: Connection> TransactionGuard<'c, C> {
    fn begin(
        connection: &'c mut C,
        isolation_level: Option<IsolationLevel>,
    ) -> std::result::Result<Self, C::Error> {
        connection.begin(isolation_level)?;
        Ok(Self {
            connection,
            open: true,
        })
    }

    fn connection(&mut self) -> &mut C {
        self.connection
    }

    fn commit(mut self) -> std::result::Result<(), C::Error> {
        self.open = false;
        self.connection.commit()
    }

    fn rollback(mut self) {
        self.open = false;
        if let Err(err) = self.connection.rollback() {
            warn!(error = %err, "Rollback failed");
        }
    }
}

impl<C: Connection> Drop for TransactionGuard<'_, C> {
    fn drop(&mut self) {
        if self.open {
            warn!("Transaction left open, rolling back");
            if let Err(err) = self.connection.rollback() {
                warn!(error = %err, "Rollback failed");
            }
        }
    }
}

/// A command that failed, with its position in the batch.
struct CommandFailure {
    index: usize,
    source: SharedError,
}

/// Executes batches against a connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchExecutor;

impl BatchExecutor {
    /// Creates a new executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Executes every command of `batch` in order on `connection`.
    ///
    /// Returns `Ok(true)` when every command succeeded and the transaction
    /// (if any) committed, `Ok(false)` on an operational failure. With
    /// `throw_on_failure` an operational failure is returned as an error
    /// after the rollback instead.
    ///
    /// Conflicting requirements inside the batch are a contract violation
    /// and always return an error. A mismatch between `use_transaction` and
    /// what the batch requires or disallows returns `Ok(false)` without
    /// running anything.
    pub fn execute<C: Connection>(
        &self,
        connection: &mut C,
        batch: &mut Batch<C>,
        use_transaction: bool,
        throw_on_failure: bool,
    ) -> Result<bool> {
        let requires = batch.requires_transaction()?;
        let disallows = batch.disallows_transaction()?;
        let isolation_level = batch.required_isolation_level()?;

        if use_transaction && disallows {
            warn!("Transaction requested for a batch that disallows transactions");
            return Ok(false);
        }
        if !use_transaction && requires {
            warn!("Batch requires a transaction but none was requested");
            return Ok(false);
        }

        debug!(
            commands = batch.len(),
            use_transaction,
            isolation_level = ?isolation_level,
            "Executing batch"
        );

        let (commands, parameters) = batch.parts_mut();

        if !use_transaction {
            return match run_commands(connection, commands, parameters, false, None) {
                Ok(()) => Ok(true),
                Err(failure) => fail(failure, throw_on_failure),
            };
        }

        let mut transaction = match TransactionGuard::begin(connection, isolation_level) {
            Ok(transaction) => transaction,
            Err(err) => {
                warn!(error = %err, "Failed to begin transaction");
                if throw_on_failure {
                    return Err(LifecycleError::Transaction {
                        source: LifecycleError::shared(err),
                    });
                }
                return Ok(false);
            }
        };

        match run_commands(transaction.connection(), commands, parameters, true, isolation_level) {
            Ok(()) => match transaction.commit() {
                Ok(()) => Ok(true),
                Err(err) => {
                    warn!(error = %err, "Failed to commit transaction");
                    if throw_on_failure {
                        return Err(LifecycleError::Transaction {
                            source: LifecycleError::shared(err),
                        });
                    }
                    Ok(false)
                }
            },
            Err(failure) => {
                transaction.rollback();
                info!(index = failure.index, "Batch rolled back");
                fail(failure, throw_on_failure)
            }
        }
    }
}

fn fail(failure: CommandFailure, throw_on_failure: bool) -> Result<bool> {
    if throw_on_failure {
        Err(LifecycleError::CommandFailed {
            index: failure.index,
            source: failure.source,
        })
    } else {
        Ok(false)
    }
}

fn run_commands<C: Connection>(
    connection: &mut C,
    commands: &mut [Command<C>],
    parameters: &mut ParameterCollection,
    in_transaction: bool,
    isolation_level: Option<IsolationLevel>,
) -> std::result::Result<(), CommandFailure> {
    for (index, command) in commands.iter_mut().enumerate() {
        let execution_type = command.execution_type();
        let outcome = match command.kind() {
            CommandKind::Script(script) => {
                debug!(index, script = %script, "Executing script command");
                run_script(connection, script, execution_type, parameters)
            }
            CommandKind::Callback(callback) => {
                debug!(index, "Executing callback command");
                let mut context = CallbackContext {
                    connection: &mut *connection,
                    in_transaction,
                    isolation_level,
                    parameters: &mut *parameters,
                };
                callback(&mut context)
            }
        };

        match outcome {
            Ok(output) => command.record_output(output),
            Err(err) => {
                warn!(index, error = %err, "Command failed");
                let source = LifecycleError::shared(err);
                command.record_failure(source.clone());
                return Err(CommandFailure { index, source });
            }
        }
    }
    Ok(())
}

fn run_script<C: Connection>(
    connection: &mut C,
    script: &str,
    execution_type: ExecutionType,
    parameters: &ParameterCollection,
) -> std::result::Result<CommandOutput, C::Error> {
    match execution_type {
        ExecutionType::Reader => connection
            .execute_reader(script, parameters)
            .map(CommandOutput::Rows),
        ExecutionType::Scalar => connection
            .execute_scalar(script, parameters)
            .map(CommandOutput::Value),
        ExecutionType::NonQuery => connection
            .execute_non_query(script, parameters)
            .map(CommandOutput::Affected),
    }
}
