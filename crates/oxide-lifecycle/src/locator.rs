//! Named batch sources.
//!
//! A locator maps batch names to fresh, unexecuted batches. The manager
//! looks up its create, upgrade, version and cleanup batches by name
//! through a [`CompositeBatchLocator`] that aggregates any number of
//! locators and rejects a name defined by more than one of them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::batch::Batch;
use crate::connection::Connection;
use crate::error::{LifecycleError, Result};
use crate::script::ScriptParser;

/// A source of named batches.
pub trait BatchLocator<C: Connection>: Send + Sync {
    /// Names of every batch this locator provides.
    fn batch_names(&self) -> BTreeSet<String>;

    /// Returns a fresh batch, or `None` if the name is unknown.
    fn batch(&self, name: &str) -> Option<Batch<C>>;
}

/// Builds a new batch on every lookup.
pub type BatchFactory<C> = Arc<dyn Fn() -> Batch<C> + Send + Sync>;

/// Batches registered in code: script texts, template batches or
/// factories.
pub struct DictionaryBatchLocator<C: Connection> {
    entries: BTreeMap<String, BatchFactory<C>>,
    parser: ScriptParser,
}

impl<C: Connection> Default for DictionaryBatchLocator<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> DictionaryBatchLocator<C> {
    /// Creates an empty locator using the default `GO` separator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parser(ScriptParser::default())
    }

    /// Creates an empty locator parsing scripts with `parser`.
    #[must_use]
    pub fn with_parser(parser: ScriptParser) -> Self {
        Self {
            entries: BTreeMap::new(),
            parser,
        }
    }

    /// Registers a factory under `name`.
    pub fn add_factory<F>(&mut self, name: impl Into<String>, factory: F) -> Result<&mut Self>
    where
        F: Fn() -> Batch<C> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(LifecycleError::DuplicateBatchName(name));
        }
        self.entries.insert(name, Arc::new(factory));
        Ok(self)
    }

    /// Registers a template batch; every lookup returns a clone of it.
    pub fn add_batch(&mut self, name: impl Into<String>, batch: Batch<C>) -> Result<&mut Self> {
        self.add_factory(name, move || batch.clone())
    }

    /// Parses `script` and registers the resulting batch.
    pub fn add_script(&mut self, name: impl Into<String>, script: &str) -> Result<&mut Self> {
        let name = name.into();
        let batch = self.parser.parse_batch(&name, script)?;
        self.add_batch(name, batch)
    }
}

impl<C: Connection> BatchLocator<C> for DictionaryBatchLocator<C> {
    fn batch_names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    fn batch(&self, name: &str) -> Option<Batch<C>> {
        self.entries.get(name).map(|factory| factory())
    }
}

/// Batches loaded from the `*.sql` files of a directory.
///
/// The file stem is the batch name (`Upgrade3.sql` → `Upgrade3`). Files
/// are read and parsed once, when the locator is created.
pub struct DirectoryBatchLocator<C: Connection> {
    directory: PathBuf,
    batches: BTreeMap<String, Batch<C>>,
}

impl<C: Connection> DirectoryBatchLocator<C> {
    /// Loads every script in `directory`.
    pub fn load(directory: impl Into<PathBuf>, parser: &ScriptParser) -> Result<Self> {
        let directory = directory.into();
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| LifecycleError::Io { path, source }
        };

        let mut batches = BTreeMap::new();
        for entry in fs::read_dir(&directory).map_err(io_error(&directory))? {
            let path = entry.map_err(io_error(&directory))?.path();
            let is_script = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"));
            if !is_script || !path.is_file() {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let script = fs::read_to_string(&path).map_err(io_error(&path))?;
            let batch = parser.parse_batch(name, &script)?;
            debug!(name, commands = batch.len(), path = %path.display(), "Loaded script");
            if batches.insert(name.to_owned(), batch).is_some() {
                return Err(LifecycleError::DuplicateBatchName(name.to_owned()));
            }
        }

        Ok(Self { directory, batches })
    }

    /// Returns the directory the scripts were loaded from.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl<C: Connection> BatchLocator<C> for DirectoryBatchLocator<C> {
    fn batch_names(&self) -> BTreeSet<String> {
        self.batches.keys().cloned().collect()
    }

    fn batch(&self, name: &str) -> Option<Batch<C>> {
        self.batches.get(name).cloned()
    }
}

/// Aggregates locators; a batch name may be defined by only one of them.
///
/// Registration is safe from several threads. Lookups take the same lock.
pub struct CompositeBatchLocator<C: Connection> {
    locators: Mutex<Vec<Arc<dyn BatchLocator<C>>>>,
}

impl<C: Connection> Default for CompositeBatchLocator<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> CompositeBatchLocator<C> {
    /// Creates an empty aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locators: Mutex::new(Vec::new()),
        }
    }

    fn locators(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn BatchLocator<C>>>> {
        self.locators.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a locator, rejecting it if it defines a name that an already
    /// registered locator defines too.
    pub fn register(&self, locator: Arc<dyn BatchLocator<C>>) -> Result<()> {
        let mut locators = self.locators();
        let names = locator.batch_names();
        for existing in locators.iter() {
            let existing_names = existing.batch_names();
            if let Some(duplicate) = names.intersection(&existing_names).next() {
                return Err(LifecycleError::DuplicateBatchName(duplicate.clone()));
            }
        }
        debug!(batches = names.len(), "Registered batch locator");
        locators.push(locator);
        Ok(())
    }

    /// Number of registered locators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locators().len()
    }

    /// Returns whether no locator is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locators().is_empty()
    }
}

impl<C: Connection> BatchLocator<C> for CompositeBatchLocator<C> {
    fn batch_names(&self) -> BTreeSet<String> {
        self.locators()
            .iter()
            .flat_map(|locator| locator.batch_names())
            .collect()
    }

    fn batch(&self, name: &str) -> Option<Batch<C>> {
        self.locators()
            .iter()
            .find_map(|locator| locator.batch(name))
    }
}
