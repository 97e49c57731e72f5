//! Database-agnostic schema lifecycle management.
//!
//! `oxide-lifecycle` detects the state and schema version of a database and
//! drives it through creation, incremental version upgrades, cleanup, and
//! backup/restore:
//! - Units of work are [`Batch`](batch::Batch)es of opaque script or callback
//!   commands, run in order with at most one transaction
//! - Upgrade steps are batches named by a pattern (`Upgrade0`, `Upgrade1`, ...)
//!   and must form a contiguous run of source versions
//! - Everything database-specific sits behind the [`Connection`](connection::Connection)
//!   and [`DatabaseProvider`](connection::DatabaseProvider) traits and the
//!   detector/cleanup/backup strategies
//!
//! # Architecture
//!
//! - **Batch** - Commands, their transaction/isolation requirements and outcomes
//! - **Executor** - Runs a batch against a connection
//! - **Locators** - Find batches by name (in code, in a script directory)
//! - **Upgrader** - Contiguous version upgrade steps
//! - **Manager** - The lifecycle state machine
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_lifecycle::prelude::*;
//!
//! let mut scripts = DictionaryBatchLocator::new();
//! scripts.add_script("Version", "PRAGMA user_version")?;
//! scripts.add_script(
//!     "Upgrade0",
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY)\nGO\nPRAGMA user_version = 1",
//! )?;
//!
//! let mut manager = DatabaseManager::builder(provider, BatchVersionDetector::new())
//!     .locator(scripts)
//!     .build()?;
//! manager.initialize()?;
//!
//! if manager.can_upgrade() {
//!     manager.upgrade()?;
//! }
//! assert_eq!(manager.state(), State::Ok);
//! ```

pub mod batch;
pub mod connection;
pub mod context;
pub mod error;
pub mod executor;
pub mod locator;
pub mod manager;
pub mod options;
pub mod requirements;
pub mod script;
pub mod state;
pub mod strategy;
pub mod upgrade;
pub mod value;

#[cfg(test)]
mod testing;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::batch::{
        Batch, CallbackContext, Command, CommandKind, CommandOutput, ExecutionType,
        IsolationLevel, TransactionRequirement,
    };
    pub use crate::connection::{Connection, DatabaseProvider, ProviderError};
    pub use crate::context::ManagerContext;
    pub use crate::error::{LifecycleError, Result};
    pub use crate::executor::BatchExecutor;
    pub use crate::locator::{
        BatchLocator, CompositeBatchLocator, DictionaryBatchLocator, DirectoryBatchLocator,
    };
    pub use crate::manager::{DatabaseManager, ManagerBuilder, ManagerStatus};
    pub use crate::options::LifecycleOptions;
    pub use crate::script::ScriptParser;
    pub use crate::state::{State, VERSION_INVALID, VERSION_NEW};
    pub use crate::strategy::{
        BackupCreator, BackupLocation, BatchCleanupProcessor, BatchVersionDetector,
        CleanupProcessor, Detection, VersionDetector,
    };
    pub use crate::upgrade::{VersionUpgradeStep, VersionUpgrader};
    pub use crate::value::{Parameter, ParameterCollection, SqlValue, ToSqlValue};
}
