//! Database lifecycle states.

use std::fmt;

use serde::Serialize;

/// Version reported for a database that exists but holds no schema.
pub const VERSION_NEW: i64 = 0;

/// Version reported when the version could not be determined.
pub const VERSION_INVALID: i64 = -1;

/// Where a database stands relative to the upgrade steps the manager
/// knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// The manager has not been initialized yet.
    #[default]
    Uninitialized,
    /// Empty database, ready for `create`.
    New,
    /// Schema is at the newest known version.
    Ok,
    /// Schema can be upgraded.
    TooOld,
    /// Schema is newer than any known upgrade step.
    TooNew,
    /// Version could not be determined or makes no sense.
    Invalid,
}

impl State {
    /// Derives a state from a detected version and the upgrader's
    /// `[min, max]` range (`None` when there are no upgrade steps).
    ///
    /// A negative version is `Invalid`, zero is `New`. Without upgrade
    /// steps every positive version is `Ok`.
    #[must_use]
    pub const fn from_version(version: i64, range: Option<(i64, i64)>) -> Self {
        if version < VERSION_NEW {
            return Self::Invalid;
        }
        if version == VERSION_NEW {
            return Self::New;
        }
        match range {
            None => Self::Ok,
            Some((_, max)) if version > max => Self::TooNew,
            Some((_, max)) if version < max => Self::TooOld,
            Some(_) => Self::Ok,
        }
    }

    /// Returns the state name as used in log output and JSON.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::New => "new",
            Self::Ok => "ok",
            Self::TooOld => "too_old",
            Self::TooNew => "too_new",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
