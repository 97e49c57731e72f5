//! Version upgrade steps.
//!
//! Each step upgrades the schema from one source version to the next.
//! Steps must form a contiguous run of source versions; the set is
//! validated when the upgrader is built, not when it is used.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::connection::{Connection, DatabaseProvider};
use crate::context::ManagerContext;
use crate::error::{LifecycleError, Result};
use crate::locator::BatchLocator;
use crate::options::SOURCE_VERSION_GROUP;

/// A batch upgrading the schema from `source_version` to
/// `source_version + 1`.
pub struct VersionUpgradeStep<C: Connection> {
    source_version: i64,
    batch: Batch<C>,
}

impl<C: Connection> VersionUpgradeStep<C> {
    /// Creates a step.
    pub fn new(source_version: i64, batch: Batch<C>) -> Result<Self> {
        if source_version < 0 {
            return Err(LifecycleError::InvalidConfiguration(format!(
                "upgrade source version must not be negative, got {source_version}"
            )));
        }
        Ok(Self {
            source_version,
            batch,
        })
    }

    /// The version this step upgrades from.
    #[must_use]
    pub const fn source_version(&self) -> i64 {
        self.source_version
    }

    /// The version this step upgrades to.
    #[must_use]
    pub const fn target_version(&self) -> i64 {
        self.source_version + 1
    }

    /// The step's batch template.
    #[must_use]
    pub const fn batch(&self) -> &Batch<C> {
        &self.batch
    }
}

impl<C: Connection> std::fmt::Debug for VersionUpgradeStep<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionUpgradeStep")
            .field("source_version", &self.source_version)
            .field("commands", &self.batch.len())
            .finish()
    }
}

/// An ordered, contiguous set of upgrade steps.
pub struct VersionUpgrader<C: Connection> {
    steps: BTreeMap<i64, VersionUpgradeStep<C>>,
}

impl<C: Connection> Default for VersionUpgrader<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C: Connection> VersionUpgrader<C> {
    /// An upgrader without steps.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            steps: BTreeMap::new(),
        }
    }

    /// Builds an upgrader from explicit steps.
    pub fn from_steps(steps: impl IntoIterator<Item = VersionUpgradeStep<C>>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for step in steps {
            let version = step.source_version;
            if map.insert(version, step).is_some() {
                return Err(LifecycleError::NonContiguousVersions {
                    previous: version,
                    next: version,
                });
            }
        }

        let versions: Vec<i64> = map.keys().copied().collect();
        for pair in versions.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(LifecycleError::NonContiguousVersions {
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }

        Ok(Self { steps: map })
    }

    /// Builds an upgrader from every batch whose name matches `pattern`.
    ///
    /// The pattern's `sourceVersion` group holds the source version; names
    /// that do not match are ignored.
    pub fn from_locator(locator: &dyn BatchLocator<C>, pattern: &Regex) -> Result<Self> {
        let mut steps = Vec::new();
        for name in locator.batch_names() {
            let Some(caps) = pattern.captures(&name) else {
                continue;
            };
            let Some(version) = caps.name(SOURCE_VERSION_GROUP) else {
                continue;
            };
            let version: i64 = version.as_str().parse().map_err(|_| {
                LifecycleError::InvalidConfiguration(format!(
                    "batch '{name}' has no valid source version"
                ))
            })?;
            let batch = locator
                .batch(&name)
                .ok_or_else(|| LifecycleError::BatchNotFound(name.clone()))?;
            debug!(batch = %name, source_version = version, "Found upgrade step");
            steps.push(VersionUpgradeStep::new(version, batch)?);
        }
        Self::from_steps(steps)
    }

    /// Smallest source version, or -1 without steps.
    #[must_use]
    pub fn min_version(&self) -> i64 {
        self.steps.keys().next().copied().unwrap_or(-1)
    }

    /// Version reached after the last step, or -1 without steps.
    #[must_use]
    pub fn max_version(&self) -> i64 {
        self.steps.keys().next_back().map_or(-1, |version| version + 1)
    }

    /// `(min_version, max_version)`, or `None` without steps.
    #[must_use]
    pub fn range(&self) -> Option<(i64, i64)> {
        (!self.is_empty()).then(|| (self.min_version(), self.max_version()))
    }

    /// Returns whether there are no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Source versions in ascending order.
    pub fn source_versions(&self) -> impl Iterator<Item = i64> + '_ {
        self.steps.keys().copied()
    }

    /// The step upgrading from `source_version`.
    #[must_use]
    pub fn step(&self, source_version: i64) -> Option<&VersionUpgradeStep<C>> {
        self.steps.get(&source_version)
    }

    /// Runs the step for `source_version` on a fresh connection.
    ///
    /// The step runs in a transaction unless its batch disallows one.
    /// Failures are reported as `Ok(false)`.
    pub fn upgrade<P>(&self, context: &ManagerContext<P>, source_version: i64) -> Result<bool>
    where
        P: DatabaseProvider<Connection = C>,
    {
        let Some(step) = self.steps.get(&source_version) else {
            return Err(LifecycleError::VersionOutOfRange {
                version: source_version,
                min: self.min_version(),
                max: self.max_version(),
            });
        };

        info!(
            from = source_version,
            to = step.target_version(),
            "Upgrading database"
        );
        let mut batch = step.batch.clone();
        let succeeded = context.apply_batch(&mut batch)?;
        if !succeeded {
            if let Some((index, command)) = batch.failed_command() {
                warn!(
                    from = source_version,
                    command = index,
                    error = command.error().unwrap_or_default(),
                    "Upgrade step failed"
                );
            } else {
                warn!(from = source_version, "Upgrade step failed");
            }
        }
        Ok(succeeded)
    }
}

impl<C: Connection> std::fmt::Debug for VersionUpgrader<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionUpgrader")
            .field("min_version", &self.min_version())
            .field("max_version", &self.max_version())
            .field("steps", &self.steps.len())
            .finish()
    }
}
