//! Database lifecycle manager.
//!
//! The [`DatabaseManager`] tracks the state and schema version of one
//! database and drives it through creation, upgrades, cleanup, backup and
//! restore. Provider-specific work is delegated to strategies.
//!
//! # Example
//!
//! ```ignore
//! use oxide_lifecycle::prelude::*;
//!
//! let mut manager = DatabaseManager::builder(provider, detector)
//!     .locator(scripts)
//!     .build()?;
//!
//! manager.initialize()?;
//! if manager.can_create() {
//!     manager.create()?;
//! }
//! if manager.can_upgrade() {
//!     manager.upgrade()?;
//! }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::connection::DatabaseProvider;
use crate::context::ManagerContext;
use crate::error::{LifecycleError, Result};
use crate::locator::BatchLocator;
use crate::options::LifecycleOptions;
use crate::state::{State, VERSION_INVALID, VERSION_NEW};
use crate::strategy::{BackupCreator, BackupLocation, CleanupProcessor, VersionDetector};
use crate::upgrade::VersionUpgrader;

type ConnectionOf<P> = <P as DatabaseProvider>::Connection;

/// Snapshot of a manager, for status reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    /// Provider name.
    pub provider: &'static str,
    /// Current state.
    pub state: State,
    /// Current version.
    pub version: i64,
    /// State found by `initialize`.
    pub initial_state: State,
    /// Version found by `initialize`.
    pub initial_version: i64,
    /// Lowest upgradeable version (-1 without upgrade steps).
    pub min_version: i64,
    /// Highest reachable version (-1 without upgrade steps).
    pub max_version: i64,
    /// Whether `create` is currently allowed.
    pub can_create: bool,
    /// Whether `upgrade` is currently allowed.
    pub can_upgrade: bool,
    /// Whether `cleanup` is currently allowed.
    pub can_cleanup: bool,
    /// Whether `backup` is currently allowed.
    pub can_backup: bool,
    /// Whether `restore` is currently allowed.
    pub can_restore: bool,
}

/// Manages the lifecycle of one database.
pub struct DatabaseManager<P: DatabaseProvider> {
    context: ManagerContext<P>,
    detector: Box<dyn VersionDetector<P>>,
    cleanup: Option<Box<dyn CleanupProcessor<P>>>,
    backup: Option<Box<dyn BackupCreator<P>>>,
    upgrader: VersionUpgrader<ConnectionOf<P>>,
    state: State,
    version: i64,
    initial_state: State,
    initial_version: i64,
}

impl<P: DatabaseProvider> DatabaseManager<P> {
    /// Starts wiring a manager.
    pub fn builder(provider: P, detector: impl VersionDetector<P> + 'static) -> ManagerBuilder<P> {
        ManagerBuilder::new(provider, detector)
    }

    // Properties

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Current version, -1 while uninitialized.
    #[must_use]
    pub const fn version(&self) -> i64 {
        self.version
    }

    /// State found by `initialize`.
    #[must_use]
    pub const fn initial_state(&self) -> State {
        self.initial_state
    }

    /// Version found by `initialize`.
    #[must_use]
    pub const fn initial_version(&self) -> i64 {
        self.initial_version
    }

    /// Lowest version an upgrade can start from (-1 without steps).
    #[must_use]
    pub fn min_version(&self) -> i64 {
        self.upgrader.min_version()
    }

    /// Highest version upgrades reach (-1 without steps).
    #[must_use]
    pub fn max_version(&self) -> i64 {
        self.upgrader.max_version()
    }

    /// Returns whether the manager has been initialized and not closed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state != State::Uninitialized
    }

    /// Returns whether a backup strategy that can back up is configured.
    #[must_use]
    pub fn supports_backup(&self) -> bool {
        self.backup.as_ref().is_some_and(|backup| backup.supports_backup())
    }

    /// Returns whether a backup strategy that can restore is configured.
    #[must_use]
    pub fn supports_restore(&self) -> bool {
        self.backup.as_ref().is_some_and(|backup| backup.supports_restore())
    }

    /// Returns whether a cleanup strategy is configured.
    #[must_use]
    pub const fn supports_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    /// Returns whether any upgrade step is known.
    #[must_use]
    pub fn supports_upgrade(&self) -> bool {
        !self.upgrader.is_empty()
    }

    /// Returns whether the provider offers read-only connections.
    #[must_use]
    pub fn supports_read_only_connections(&self) -> bool {
        self.context.provider().supports_read_only_connections()
    }

    /// The shared context (provider, locator, options).
    #[must_use]
    pub const fn context(&self) -> &ManagerContext<P> {
        &self.context
    }

    /// The upgrade steps.
    #[must_use]
    pub const fn upgrader(&self) -> &VersionUpgrader<ConnectionOf<P>> {
        &self.upgrader
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            provider: self.context.provider().name(),
            state: self.state,
            version: self.version,
            initial_state: self.initial_state,
            initial_version: self.initial_version,
            min_version: self.min_version(),
            max_version: self.max_version(),
            can_create: self.can_create(),
            can_upgrade: self.can_upgrade(),
            can_cleanup: self.can_cleanup(),
            can_backup: self.can_backup(),
            can_restore: self.can_restore(),
        }
    }

    // Lifecycle

    /// Detects the database state. Only allowed once (until `close`).
    pub fn initialize(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Err(LifecycleError::AlreadyInitialized(self.state));
        }
        let (state, version) = self.detect();
        self.state = state;
        self.version = version;
        self.initial_state = state;
        self.initial_version = version;
        info!(
            provider = self.context.provider().name(),
            state = %state,
            version,
            "Database manager initialized"
        );
        Ok(())
    }

    /// Returns to `Uninitialized`. Can be called in any state, any number
    /// of times.
    pub fn close(&mut self) {
        if self.is_initialized() {
            debug!(state = %self.state, version = self.version, "Closing database manager");
        }
        self.state = State::Uninitialized;
        self.version = VERSION_INVALID;
    }

    fn detect(&self) -> (State, i64) {
        match self.detector.detect(&self.context) {
            Ok(detection) => {
                let state = detection
                    .state
                    .filter(|state| *state != State::Uninitialized)
                    .unwrap_or_else(|| {
                        State::from_version(detection.version, self.upgrader.range())
                    });
                (state, detection.version)
            }
            Err(err) => {
                warn!(error = %err, "Version detection failed");
                (State::Invalid, VERSION_INVALID)
            }
        }
    }

    fn refresh(&mut self) {
        let (state, version) = self.detect();
        self.state = state;
        self.version = version;
    }

    const fn invalid_operation(&self, operation: &'static str) -> LifecycleError {
        LifecycleError::InvalidOperation {
            operation,
            state: self.state,
        }
    }

    // Create

    /// Returns whether `create` is allowed.
    #[must_use]
    pub fn can_create(&self) -> bool {
        self.state == State::New
            && (self.context.has_batch(&self.context.options().create_batch_name)
                || self.upgrader.min_version() == VERSION_NEW)
    }

    /// Creates the schema of a new database.
    ///
    /// Runs the create batch when one exists, otherwise every upgrade step
    /// starting at version 0.
    pub fn create(&mut self) -> Result<bool> {
        if !self.can_create() {
            return Err(self.invalid_operation("create"));
        }

        let name = self.context.options().create_batch_name.clone();
        if !self.context.has_batch(&name) {
            info!(to = self.max_version(), "Creating database from upgrade steps");
            return self.run_upgrades(self.max_version());
        }

        info!(batch = %name, "Creating database");
        let mut batch = self.context.batch(&name)?;
        if !self.context.apply_batch(&mut batch)? {
            warn!(batch = %name, "Create batch failed");
            return Ok(false);
        }
        self.refresh();
        info!(state = %self.state, version = self.version, "Database created");
        Ok(true)
    }

    // Upgrade

    /// Returns whether `upgrade` is allowed.
    #[must_use]
    pub fn can_upgrade(&self) -> bool {
        matches!(self.state, State::New | State::TooOld)
            && !self.upgrader.is_empty()
            && self.upgrader.min_version() <= self.version
            && self.version < self.upgrader.max_version()
    }

    /// Upgrades step by step to the newest version.
    pub fn upgrade(&mut self) -> Result<bool> {
        if !self.can_upgrade() {
            return Err(self.invalid_operation("upgrade"));
        }
        self.run_upgrades(self.max_version())
    }

    /// Upgrades step by step to `target`.
    ///
    /// A target equal to the current version succeeds without doing
    /// anything.
    pub fn upgrade_to(&mut self, target: i64) -> Result<bool> {
        if !self.is_initialized() {
            return Err(self.invalid_operation("upgrade_to"));
        }
        if target == self.version {
            return Ok(true);
        }
        if target < self.version || target > self.max_version() {
            return Err(LifecycleError::InvalidTargetVersion {
                target,
                version: self.version,
                max: self.max_version(),
            });
        }
        if !self.can_upgrade() {
            return Err(self.invalid_operation("upgrade_to"));
        }
        self.run_upgrades(target)
    }

    fn run_upgrades(&mut self, target: i64) -> Result<bool> {
        while self.version < target {
            let source = self.version;
            if !self.upgrader.upgrade(&self.context, source)? {
                return Ok(false);
            }

            let (state, version) = self.detect();
            if version != source + 1 {
                warn!(
                    expected = source + 1,
                    detected = version,
                    state = %state,
                    "Unexpected version after upgrade step"
                );
                return Ok(false);
            }
            self.state = state;
            self.version = version;
            info!(version, state = %state, "Upgrade step completed");
        }
        Ok(true)
    }

    // Cleanup

    /// Returns whether `cleanup` is allowed.
    #[must_use]
    pub fn can_cleanup(&self) -> bool {
        self.is_initialized() && self.supports_cleanup()
    }

    /// Runs the cleanup strategy.
    pub fn cleanup(&mut self) -> Result<bool> {
        let Some(cleanup) = self.cleanup.as_ref().filter(|_| self.is_initialized()) else {
            return Err(self.invalid_operation("cleanup"));
        };
        info!("Cleaning up database");
        let cleaned = cleanup.cleanup(&self.context)?;
        if !cleaned {
            warn!("Cleanup failed");
        }
        Ok(cleaned)
    }

    // Backup

    /// Returns whether `backup` is allowed.
    #[must_use]
    pub fn can_backup(&self) -> bool {
        self.is_initialized() && self.supports_backup()
    }

    /// Writes a backup to `target`.
    pub fn backup(&mut self, target: &BackupLocation) -> Result<bool> {
        if !self.can_backup() {
            return Err(self.invalid_operation("backup"));
        }
        let Some(backup) = self.backup.as_ref() else {
            return Err(self.invalid_operation("backup"));
        };
        info!(target = %target, "Backing up database");
        let done = backup.backup(&self.context, target)?;
        if !done {
            warn!(target = %target, "Backup failed");
        }
        Ok(done)
    }

    /// Returns whether `restore` is allowed.
    #[must_use]
    pub fn can_restore(&self) -> bool {
        self.is_initialized() && self.supports_restore()
    }

    /// Replaces the database with the backup at `source`, then detects its
    /// state again.
    pub fn restore(&mut self, source: &BackupLocation) -> Result<bool> {
        if !self.can_restore() {
            return Err(self.invalid_operation("restore"));
        }
        let Some(backup) = self.backup.as_ref() else {
            return Err(self.invalid_operation("restore"));
        };
        info!(source = %source, "Restoring database");
        if !backup.restore(&self.context, source)? {
            warn!(source = %source, "Restore failed");
            return Ok(false);
        }
        self.refresh();
        info!(state = %self.state, version = self.version, "Database restored");
        Ok(true)
    }

    // Batches

    /// The create batch.
    pub fn create_batch(&self) -> Result<Batch<ConnectionOf<P>>> {
        self.context.batch(&self.context.options().create_batch_name)
    }

    /// A batch by name.
    pub fn batch(&self, name: &str) -> Result<Batch<ConnectionOf<P>>> {
        self.context.batch(name)
    }

    /// Names of every known batch.
    #[must_use]
    pub fn batch_names(&self) -> BTreeSet<String> {
        self.context.batch_names()
    }

    /// Runs a batch on a new connection.
    pub fn execute_batch(
        &self,
        batch: &mut Batch<ConnectionOf<P>>,
        use_transaction: bool,
        throw_on_failure: bool,
    ) -> Result<bool> {
        self.context
            .execute_batch(batch, use_transaction, throw_on_failure)
    }
}

impl<P: DatabaseProvider> std::fmt::Debug for DatabaseManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("context", &self.context)
            .field("upgrader", &self.upgrader)
            .field("state", &self.state)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Wires a [`DatabaseManager`].
pub struct ManagerBuilder<P: DatabaseProvider> {
    provider: P,
    detector: Box<dyn VersionDetector<P>>,
    locators: Vec<Arc<dyn BatchLocator<ConnectionOf<P>>>>,
    cleanup: Option<Box<dyn CleanupProcessor<P>>>,
    backup: Option<Box<dyn BackupCreator<P>>>,
    options: LifecycleOptions,
    upgrader: Option<VersionUpgrader<ConnectionOf<P>>>,
}

impl<P: DatabaseProvider> ManagerBuilder<P> {
    /// Starts with a provider and a version detector.
    pub fn new(provider: P, detector: impl VersionDetector<P> + 'static) -> Self {
        Self {
            provider,
            detector: Box::new(detector),
            locators: Vec::new(),
            cleanup: None,
            backup: None,
            options: LifecycleOptions::default(),
            upgrader: None,
        }
    }

    /// Adds a batch locator.
    #[must_use]
    pub fn locator(mut self, locator: impl BatchLocator<ConnectionOf<P>> + 'static) -> Self {
        self.locators.push(Arc::new(locator));
        self
    }

    /// Adds a batch locator shared with other owners.
    #[must_use]
    pub fn shared_locator(mut self, locator: Arc<dyn BatchLocator<ConnectionOf<P>>>) -> Self {
        self.locators.push(locator);
        self
    }

    /// Sets the cleanup strategy.
    #[must_use]
    pub fn cleanup(mut self, cleanup: impl CleanupProcessor<P> + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Sets the backup strategy.
    #[must_use]
    pub fn backup(mut self, backup: impl BackupCreator<P> + 'static) -> Self {
        self.backup = Some(Box::new(backup));
        self
    }

    /// Sets the options.
    #[must_use]
    pub fn options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses explicit upgrade steps instead of the ones found by name.
    #[must_use]
    pub fn upgrader(mut self, upgrader: VersionUpgrader<ConnectionOf<P>>) -> Self {
        self.upgrader = Some(upgrader);
        self
    }

    /// Registers the locators and builds the upgrader.
    ///
    /// Fails on duplicate batch names, an invalid upgrade pattern, or
    /// upgrade steps that are not contiguous.
    pub fn build(self) -> Result<DatabaseManager<P>> {
        let pattern = self.options.upgrade_pattern()?;
        let context = ManagerContext::new(self.provider, self.options);
        for locator in self.locators {
            context.locator().register(locator)?;
        }

        let upgrader = match self.upgrader {
            Some(upgrader) => upgrader,
            None => VersionUpgrader::from_locator(context.locator(), &pattern)?,
        };
        debug!(
            provider = context.provider().name(),
            batches = context.batch_names().len(),
            min_version = upgrader.min_version(),
            max_version = upgrader.max_version(),
            "Database manager built"
        );

        Ok(DatabaseManager {
            context,
            detector: self.detector,
            cleanup: self.cleanup,
            backup: self.backup,
            upgrader,
            state: State::Uninitialized,
            version: VERSION_INVALID,
            initial_state: State::Uninitialized,
            initial_version: VERSION_INVALID,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Command, TransactionRequirement};
    use crate::locator::DictionaryBatchLocator;
    use crate::strategy::{BatchCleanupProcessor, BatchVersionDetector, Detection};
    use crate::testing::{MockConnection, MockProvider};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Scripts = DictionaryBatchLocator<MockConnection>;

    fn scripts(entries: &[(&str, &str)]) -> Scripts {
        let mut locator = Scripts::new();
        for (name, script) in entries {
            locator.add_script(*name, script).unwrap();
        }
        locator
    }

    fn upgrades() -> Scripts {
        scripts(&[
            ("Version", "SELECT VERSION"),
            ("Upgrade0", "SET VERSION 1"),
            ("Upgrade1", "SET VERSION 2"),
            ("Upgrade2", "SET VERSION 3"),
        ])
    }

    fn manager(provider: &MockProvider, locator: Scripts) -> DatabaseManager<MockProvider> {
        DatabaseManager::builder(provider.clone(), BatchVersionDetector::new())
            .locator(locator)
            .build()
            .unwrap()
    }

    /// Backup strategy recording calls; `ok` decides the outcome.
    struct RecordingBackup {
        ok: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl BackupCreator<MockProvider> for RecordingBackup {
        fn backup(
            &self,
            _: &ManagerContext<MockProvider>,
            target: &BackupLocation,
        ) -> Result<bool> {
            self.calls.lock().unwrap().push(format!("backup {target}"));
            Ok(self.ok)
        }

        fn restore(
            &self,
            context: &ManagerContext<MockProvider>,
            source: &BackupLocation,
        ) -> Result<bool> {
            self.calls.lock().unwrap().push(format!("restore {source}"));
            if self.ok {
                context.provider().state().version = 2;
            }
            Ok(self.ok)
        }
    }

    struct FailingDetector;

    impl VersionDetector<MockProvider> for FailingDetector {
        fn detect(&self, _: &ManagerContext<MockProvider>) -> Result<Detection> {
            Err(LifecycleError::BatchNotFound("Version".into()))
        }
    }

    /// Detects normally for `healthy_calls` calls, then fails.
    struct FlakyDetector {
        calls: AtomicUsize,
        healthy_calls: usize,
    }

    impl VersionDetector<MockProvider> for FlakyDetector {
        fn detect(&self, context: &ManagerContext<MockProvider>) -> Result<Detection> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.healthy_calls {
                BatchVersionDetector::new().detect(context)
            } else {
                Err(LifecycleError::BatchNotFound("Version".into()))
            }
        }
    }

    #[test]
    fn test_initial_state() {
        let provider = MockProvider::default();
        let manager = manager(&provider, upgrades());
        assert_eq!(manager.state(), State::Uninitialized);
        assert_eq!(manager.version(), -1);
        assert!(!manager.can_create());
        assert!(!manager.can_upgrade());
        assert!(!manager.can_cleanup());
        assert_eq!(manager.min_version(), 0);
        assert_eq!(manager.max_version(), 3);
    }

    #[test]
    fn test_initialize_twice() {
        let provider = MockProvider::default();
        let mut manager = manager(&provider, upgrades());
        manager.initialize().unwrap();
        assert!(matches!(
            manager.initialize(),
            Err(LifecycleError::AlreadyInitialized(State::New))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let provider = MockProvider::with_version(3);
        let mut manager = manager(&provider, upgrades());
        manager.close();
        manager.close();
        assert_eq!(manager.state(), State::Uninitialized);

        manager.initialize().unwrap();
        assert_eq!(manager.state(), State::Ok);
        manager.close();
        manager.close();
        assert_eq!(manager.state(), State::Uninitialized);
        assert_eq!(manager.version(), -1);
        assert_eq!(manager.initial_state(), State::Ok);
        assert_eq!(manager.initial_version(), 3);

        manager.initialize().unwrap();
        assert_eq!(manager.state(), State::Ok);
    }

    #[test]
    fn test_state_derivation() {
        for (version, state) in [
            (0, State::New),
            (1, State::TooOld),
            (2, State::TooOld),
            (3, State::Ok),
            (4, State::TooNew),
            (-1, State::Invalid),
        ] {
            let provider = MockProvider::with_version(version);
            let mut manager = manager(&provider, upgrades());
            manager.initialize().unwrap();
            assert_eq!(manager.state(), state, "version {version}");
            assert_eq!(manager.version(), version);
        }
    }

    #[test]
    fn test_state_without_upgrader() {
        let provider = MockProvider::with_version(7);
        let mut manager = manager(&provider, scripts(&[("Version", "SELECT VERSION")]));
        manager.initialize().unwrap();
        assert_eq!(manager.state(), State::Ok);
        assert!(!manager.supports_upgrade());
    }

    #[test]
    fn test_detection_error_is_invalid() {
        let provider = MockProvider::default();
        let mut manager = DatabaseManager::builder(provider, FailingDetector)
            .locator(upgrades())
            .build()
            .unwrap();
        manager.initialize().unwrap();
        assert_eq!(manager.state(), State::Invalid);
        assert_eq!(manager.version(), -1);
        assert!(!manager.can_create());
        assert!(!manager.can_upgrade());
    }

    #[test]
    fn test_upgrade_from_zero_in_three_steps() {
        let provider = MockProvider::default();
        let mut manager = manager(&provider, upgrades());
        manager.initialize().unwrap();
        assert_eq!(manager.state(), State::New);
        assert!(manager.can_upgrade());

        assert!(manager.upgrade().unwrap());
        assert_eq!(manager.state(), State::Ok);
        assert_eq!(manager.version(), 3);
        let steps = provider
            .log()
            .iter()
            .filter(|entry| entry.starts_with("SET VERSION"))
            .count();
        assert_eq!(steps, 3);
        assert!(!manager.can_upgrade());
        assert!(matches!(
            manager.upgrade(),
            Err(LifecycleError::InvalidOperation { operation: "upgrade", state: State::Ok })
        ));
    }

    #[test]
    fn test_upgrade_from_too_old() {
        let provider = MockProvider::with_version(2);
        let mut manager = manager(&provider, upgrades());
        manager.initialize().unwrap();
        assert_eq!(manager.state(), State::TooOld);
        assert!(manager.upgrade().unwrap());
        assert_eq!(manager.version(), 3);
        assert_eq!(manager.initial_version(), 2);
    }

    #[test]
    fn test_upgrade_below_min_not_allowed() {
        let provider = MockProvider::with_version(1);
        let mut manager = manager(
            &provider,
            scripts(&[
                ("Version", "SELECT VERSION"),
                ("Upgrade2", "SET VERSION 3"),
                ("Upgrade3", "SET VERSION 4"),
            ]),
        );
        manager.initialize().unwrap();
        assert_eq!(manager.state(), State::TooOld);
        assert!(!manager.can_upgrade());
        assert!(manager.upgrade().is_err());
    }

    #[test]
    fn test_upgrade_step_failure_keeps_last_version() {
        let provider = MockProvider::default();
        let mut manager = manager(
            &provider,
            scripts(&[
                ("Version", "SELECT VERSION"),
                ("Upgrade0", "SET VERSION 1"),
                ("Upgrade1", "SET VERSION 2\nGO\nFAIL duplicate column"),
                ("Upgrade2", "SET VERSION 3"),
            ]),
        );
        manager.initialize().unwrap();
        assert!(!manager.upgrade().unwrap());
        assert_eq!(manager.version(), 1);
        assert_eq!(manager.state(), State::TooOld);
        assert_eq!(provider.state().version, 1);
    }

    #[test]
    fn test_upgrade_step_with_wrong_version() {
        let provider = MockProvider::default();
        let mut manager = manager(
            &provider,
            scripts(&[
                ("Version", "SELECT VERSION"),
                ("Upgrade0", "SET VERSION 2"),
                ("Upgrade1", "SET VERSION 2"),
            ]),
        );
        manager.initialize().unwrap();
        assert!(!manager.upgrade().unwrap());
        assert_eq!(manager.version(), 0);
        assert_eq!(manager.state(), State::New);
        assert_eq!(provider.state().version, 2);
    }

    #[test]
    fn test_detection_error_after_step_keeps_last_version() {
        let provider = MockProvider::default();
        let detector = FlakyDetector {
            calls: AtomicUsize::new(0),
            healthy_calls: 2,
        };
        let mut manager = DatabaseManager::builder(provider.clone(), detector)
            .locator(upgrades())
            .build()
            .unwrap();
        manager.initialize().unwrap();

        assert!(!manager.upgrade().unwrap());
        assert_eq!(manager.version(), 1);
        assert_eq!(manager.state(), State::TooOld);
        assert_eq!(provider.state().version, 2);
    }

    #[test]
    fn test_upgrade_to() {
        let provider = MockProvider::default();
        let mut manager = manager(&provider, upgrades());
        manager.initialize().unwrap();

        assert!(manager.upgrade_to(2).unwrap());
        assert_eq!(manager.version(), 2);
        assert_eq!(manager.state(), State::TooOld);

        assert!(manager.upgrade_to(2).unwrap());
        assert!(matches!(
            manager.upgrade_to(1),
            Err(LifecycleError::InvalidTargetVersion { target: 1, version: 2, max: 3 })
        ));
        assert!(matches!(
            manager.upgrade_to(9),
            Err(LifecycleError::InvalidTargetVersion { .. })
        ));
        assert!(manager.upgrade_to(3).unwrap());
        assert_eq!(manager.state(), State::Ok);
    }

    #[test]
    fn test_upgrade_to_uninitialized() {
        let provider = MockProvider::default();
        let mut manager = manager(&provider, upgrades());
        assert!(matches!(
            manager.upgrade_to(1),
            Err(LifecycleError::InvalidOperation { operation: "upgrade_to", .. })
        ));
    }

    #[test]
    fn test_create_with_batch() {
        let provider = MockProvider::default();
        let mut locator = upgrades();
        locator.add_script("Create", "SET VERSION 3").unwrap();
        let mut manager = manager(&provider, locator);
        manager.initialize().unwrap();
        assert!(manager.can_create());

        assert!(manager.create().unwrap());
        assert_eq!(manager.state(), State::Ok);
        assert_eq!(manager.version(), 3);
        assert!(!manager.can_create());
        assert!(matches!(
            manager.create(),
            Err(LifecycleError::InvalidOperation { operation: "create", .. })
        ));
    }

    #[test]
    fn test_create_from_upgrades() {
        let provider = MockProvider::default();
        let mut manager = manager(&provider, upgrades());
        manager.initialize().unwrap();
        assert!(manager.can_create());
        assert!(manager.create().unwrap());
        assert_eq!(manager.version(), 3);
        assert_eq!(manager.state(), State::Ok);
    }

    #[test]
    fn test_create_failure_keeps_state() {
        let provider = MockProvider::default();
        let mut locator = upgrades();
        locator.add_script("Create", "SET VERSION 3\nGO\nFAIL syntax").unwrap();
        let mut manager = manager(&provider, locator);
        manager.initialize().unwrap();
        assert!(!manager.create().unwrap());
        assert_eq!(manager.state(), State::New);
        assert_eq!(provider.state().version, 0);
    }

    #[test]
    fn test_cannot_create_without_batch_or_step_zero() {
        let provider = MockProvider::default();
        let mut manager = manager(
            &provider,
            scripts(&[("Version", "SELECT VERSION"), ("Upgrade1", "SET VERSION 2")]),
        );
        manager.initialize().unwrap();
        assert_eq!(manager.state(), State::New);
        assert!(!manager.can_create());
    }

    #[test]
    fn test_cleanup() {
        let provider = MockProvider::with_version(3);
        let mut manager = DatabaseManager::builder(provider.clone(), BatchVersionDetector::new())
            .locator(upgrades())
            .locator(scripts(&[("Cleanup", "-- @transaction: disallowed\nVACUUM")]))
            .cleanup(BatchCleanupProcessor::new())
            .build()
            .unwrap();
        assert!(manager.supports_cleanup());
        assert!(!manager.can_cleanup());
        assert!(manager.cleanup().is_err());

        manager.initialize().unwrap();
        assert!(manager.cleanup().unwrap());
        assert_eq!(provider.log().last().map(String::as_str), Some("VACUUM"));
    }

    #[test]
    fn test_missing_strategies() {
        let provider = MockProvider::with_version(3);
        let mut manager = manager(&provider, upgrades());
        manager.initialize().unwrap();
        assert!(!manager.supports_backup());
        assert!(!manager.supports_restore());
        assert!(!manager.supports_cleanup());
        let target = BackupLocation::Named("nightly".into());
        assert!(matches!(
            manager.backup(&target),
            Err(LifecycleError::InvalidOperation { operation: "backup", .. })
        ));
        assert!(manager.restore(&target).is_err());
        assert!(manager.cleanup().is_err());
    }

    #[test]
    fn test_backup_and_restore() {
        let provider = MockProvider::with_version(3);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut manager = DatabaseManager::builder(provider.clone(), BatchVersionDetector::new())
            .locator(upgrades())
            .backup(RecordingBackup {
                ok: true,
                calls: Arc::clone(&calls),
            })
            .build()
            .unwrap();
        manager.initialize().unwrap();

        let location = BackupLocation::Named("nightly".into());
        assert!(manager.backup(&location).unwrap());
        assert!(manager.restore(&location).unwrap());
        assert_eq!(manager.version(), 2);
        assert_eq!(manager.state(), State::TooOld);
        assert_eq!(*calls.lock().unwrap(), ["backup nightly", "restore nightly"]);
    }

    #[test]
    fn test_failed_restore_keeps_state() {
        let provider = MockProvider::with_version(3);
        let mut manager = DatabaseManager::builder(provider.clone(), BatchVersionDetector::new())
            .locator(upgrades())
            .backup(RecordingBackup {
                ok: false,
                calls: Arc::default(),
            })
            .build()
            .unwrap();
        manager.initialize().unwrap();
        let location = BackupLocation::Named("nightly".into());
        assert!(!manager.backup(&location).unwrap());
        assert!(!manager.restore(&location).unwrap());
        assert_eq!(manager.version(), 3);
    }

    #[test]
    fn test_builder_rejects_duplicate_names() {
        let err = DatabaseManager::builder(MockProvider::default(), BatchVersionDetector::new())
            .locator(upgrades())
            .locator(scripts(&[("Upgrade1", "SET VERSION 2")]))
            .build()
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DuplicateBatchName(name) if name == "Upgrade1"));
    }

    #[test]
    fn test_builder_rejects_gaps() {
        let err = DatabaseManager::builder(MockProvider::default(), BatchVersionDetector::new())
            .locator(scripts(&[("Upgrade0", "SET VERSION 1"), ("Upgrade2", "SET VERSION 3")]))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::NonContiguousVersions { previous: 0, next: 2 }
        ));
    }

    #[test]
    fn test_builder_with_explicit_upgrader() {
        let upgrader = VersionUpgrader::from_steps([crate::upgrade::VersionUpgradeStep::new(
            0,
            Batch::new().script("SET VERSION 1"),
        )
        .unwrap()])
        .unwrap();
        let manager = DatabaseManager::builder(MockProvider::default(), BatchVersionDetector::new())
            .locator(upgrades())
            .upgrader(upgrader)
            .build()
            .unwrap();
        assert_eq!(manager.max_version(), 1);
    }

    #[test]
    fn test_execute_batch_and_lookup() {
        let provider = MockProvider::default();
        let manager = manager(&provider, upgrades());
        assert!(manager.batch_names().contains("Upgrade2"));
        assert!(matches!(
            manager.create_batch(),
            Err(LifecycleError::BatchNotFound(name)) if name == "Create"
        ));

        let mut batch = Batch::new().command(
            Command::script("SET VERSION 5").transaction(TransactionRequirement::Required),
        );
        assert!(!manager.execute_batch(&mut batch.clone(), false, false).unwrap());
        assert!(manager.execute_batch(&mut batch, true, true).unwrap());
        assert_eq!(provider.state().version, 5);

        let mut batch = manager.batch("Version").unwrap();
        assert!(manager.execute_batch(&mut batch, false, false).unwrap());
        assert_eq!(batch.last_result().and_then(crate::value::SqlValue::as_i64), Some(5));
    }

    #[test]
    fn test_status() {
        let provider = MockProvider::with_version(1);
        let mut manager = manager(&provider, upgrades());
        manager.initialize().unwrap();
        let status = manager.status();
        assert_eq!(status.state, State::TooOld);
        assert!(status.can_upgrade);
        assert!(!status.can_create);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "too_old");
        assert_eq!(json["provider"], "mock");
    }
}
