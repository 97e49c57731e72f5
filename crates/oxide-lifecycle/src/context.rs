//! Shared context handed to strategies and the upgrader.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::batch::Batch;
use crate::connection::{DatabaseProvider, ProviderError};
use crate::error::{LifecycleError, Result};
use crate::executor::BatchExecutor;
use crate::locator::{BatchLocator, CompositeBatchLocator};
use crate::options::LifecycleOptions;

/// The provider, batch locator and options a manager works with.
///
/// Strategies receive a reference to it instead of the manager, so they can
/// open connections, look up batches and run them without touching the
/// manager's state.
pub struct ManagerContext<P: DatabaseProvider> {
    provider: P,
    locator: CompositeBatchLocator<P::Connection>,
    options: LifecycleOptions,
    executor: BatchExecutor,
}

impl<P: DatabaseProvider> ManagerContext<P> {
    /// Creates a context with an empty locator.
    #[must_use]
    pub fn new(provider: P, options: LifecycleOptions) -> Self {
        Self {
            provider,
            locator: CompositeBatchLocator::new(),
            options,
            executor: BatchExecutor::new(),
        }
    }

    /// Returns the database provider.
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the aggregated batch locator.
    pub const fn locator(&self) -> &CompositeBatchLocator<P::Connection> {
        &self.locator
    }

    /// Returns the options.
    pub const fn options(&self) -> &LifecycleOptions {
        &self.options
    }

    /// Opens a connection. A read-only request falls back to a read-write
    /// connection when the provider has no read-only mode.
    pub fn connect(&self, read_only: bool) -> std::result::Result<P::Connection, ProviderError<P>> {
        let read_only = read_only && self.provider.supports_read_only_connections();
        debug!(provider = self.provider.name(), read_only, "Opening connection");
        self.provider.connect(read_only)
    }

    /// Looks up a batch by name.
    pub fn batch(&self, name: &str) -> Result<Batch<P::Connection>> {
        self.locator
            .batch(name)
            .ok_or_else(|| LifecycleError::BatchNotFound(name.to_string()))
    }

    /// Returns whether a batch with this name exists.
    pub fn has_batch(&self, name: &str) -> bool {
        self.locator.batch_names().contains(name)
    }

    /// Names of every known batch.
    pub fn batch_names(&self) -> BTreeSet<String> {
        self.locator.batch_names()
    }

    /// Runs `batch` on a new read-write connection.
    pub fn execute_batch(
        &self,
        batch: &mut Batch<P::Connection>,
        use_transaction: bool,
        throw_on_failure: bool,
    ) -> Result<bool> {
        self.execute_batch_with(false, batch, use_transaction, throw_on_failure)
    }

    /// Runs `batch` on a new connection. A connection failure is reported
    /// like any other operational failure.
    pub fn execute_batch_with(
        &self,
        read_only: bool,
        batch: &mut Batch<P::Connection>,
        use_transaction: bool,
        throw_on_failure: bool,
    ) -> Result<bool> {
        let mut connection = match self.connect(read_only) {
            Ok(connection) => connection,
            Err(err) => {
                warn!(provider = self.provider.name(), error = %err, "Failed to connect");
                if throw_on_failure {
                    return Err(LifecycleError::Connection {
                        source: LifecycleError::shared(err),
                    });
                }
                return Ok(false);
            }
        };
        self.executor
            .execute(&mut connection, batch, use_transaction, throw_on_failure)
    }

    /// Runs `batch` in a transaction unless one of its commands disallows
    /// it. Failures are reported as `Ok(false)`.
    pub fn apply_batch(&self, batch: &mut Batch<P::Connection>) -> Result<bool> {
        let use_transaction = !batch.disallows_transaction()?;
        self.execute_batch(batch, use_transaction, false)
    }
}

impl<P: DatabaseProvider> std::fmt::Debug for ManagerContext<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerContext")
            .field("provider", &self.provider.name())
            .field("batches", &self.locator.batch_names())
            .field("options", &self.options)
            .finish()
    }
}
