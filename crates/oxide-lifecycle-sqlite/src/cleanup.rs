//! SQLite maintenance.

use oxide_lifecycle::batch::{Batch, Command, ExecutionType, TransactionRequirement};
use oxide_lifecycle::context::ManagerContext;
use oxide_lifecycle::error::Result;
use oxide_lifecycle::strategy::CleanupProcessor;
use tracing::info;

use crate::connection::SqliteDbConnection;
use crate::provider::SqliteProvider;

const MAINTENANCE: [&str; 3] = ["VACUUM", "ANALYZE", "PRAGMA optimize"];

/// Runs the `cleanup_batch_name` batch when one exists, otherwise
/// `VACUUM`, `ANALYZE` and `PRAGMA optimize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteCleanupProcessor;

impl SqliteCleanupProcessor {
    /// Creates a cleanup strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn maintenance_batch() -> Batch<SqliteDbConnection> {
        MAINTENANCE.into_iter().fold(Batch::new(), |batch, statement| {
            batch.command(
                Command::script(statement)
                    .transaction(TransactionRequirement::Disallowed)
                    .execution(ExecutionType::NonQuery),
            )
        })
    }
}

impl CleanupProcessor<SqliteProvider> for SqliteCleanupProcessor {
    fn cleanup(&self, context: &ManagerContext<SqliteProvider>) -> Result<bool> {
        let name = context.options().cleanup_batch_name.as_str();
        let mut batch = if context.has_batch(name) {
            context.batch(name)?
        } else {
            Self::maintenance_batch()
        };

        let done = context.apply_batch(&mut batch)?;
        if done {
            info!(path = %context.provider().path().display(), "Cleanup complete");
        }
        Ok(done)
    }
}
