//! SQLite backup and restore.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use oxide_lifecycle::batch::{Batch, Command, ExecutionType, TransactionRequirement};
use oxide_lifecycle::context::ManagerContext;
use oxide_lifecycle::error::{LifecycleError, Result};
use oxide_lifecycle::strategy::{BackupCreator, BackupLocation};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::provider::SqliteProvider;

/// Files SQLite keeps next to the database.
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Backs up with `VACUUM INTO` and restores by replacing the database
/// file. Only file locations are supported.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBackupCreator;

impl SqliteBackupCreator {
    /// Creates a backup strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// `<database>.<YYYYmmddHHMMSS>.bak` next to the database.
#[must_use]
pub fn timestamped_backup_path(database: &Path, at: DateTime<Local>) -> PathBuf {
    let mut name = database.as_os_str().to_owned();
    name.push(format!(".{}.bak", at.format("%Y%m%d%H%M%S")));
    PathBuf::from(name)
}

fn sidecar(database: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = database.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn file_location(location: &BackupLocation) -> Result<&Path> {
    match location {
        BackupLocation::File(path) => Ok(path),
        BackupLocation::Named(name) => Err(LifecycleError::UnsupportedLocation(format!(
            "SQLite backups need a file path, got name '{name}'"
        ))),
    }
}

impl BackupCreator<SqliteProvider> for SqliteBackupCreator {
    fn backup(
        &self,
        context: &ManagerContext<SqliteProvider>,
        target: &BackupLocation,
    ) -> Result<bool> {
        let target = file_location(target)?;
        if target.exists() {
            warn!(target = %target.display(), "Backup target already exists");
            return Ok(false);
        }

        let mut batch = Batch::new()
            .command(
                Command::script("VACUUM INTO :target")
                    .transaction(TransactionRequirement::Disallowed)
                    .execution(ExecutionType::NonQuery),
            )
            .parameter("target", target);
        let done = context.execute_batch(&mut batch, false, false)?;
        if done {
            info!(target = %target.display(), "Backup written");
        } else if let Some((_, command)) = batch.failed_command() {
            warn!(error = command.error().unwrap_or_default(), "Backup failed");
        }
        Ok(done)
    }

    fn restore(
        &self,
        context: &ManagerContext<SqliteProvider>,
        source: &BackupLocation,
    ) -> Result<bool> {
        let source = file_location(source)?;
        if !source.is_file() {
            warn!(source = %source.display(), "Backup file does not exist");
            return Ok(false);
        }

        let database = context.provider().path();
        let staged = match stage_copy(source, database) {
            Ok(staged) => staged,
            Err(err) => {
                warn!(source = %source.display(), error = %err, "Failed to copy backup");
                return Ok(false);
            }
        };

        for suffix in SIDECAR_SUFFIXES {
            let path = sidecar(database, suffix);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale file"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to remove stale file");
                    return Ok(false);
                }
            }
        }

        if let Err(err) = staged.persist(database) {
            warn!(
                database = %database.display(),
                error = %err.error,
                "Failed to replace database"
            );
            return Ok(false);
        }
        info!(source = %source.display(), database = %database.display(), "Database restored");
        Ok(true)
    }
}

/// Copies `source` into a synced temporary file next to `database`.
///
/// The file is removed again when dropped without being persisted.
fn stage_copy(source: &Path, database: &Path) -> io::Result<NamedTempFile> {
    let directory = match database.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(directory)?;
    io::copy(&mut File::open(source)?, staged.as_file_mut())?;
    fs::set_permissions(staged.path(), fs::metadata(source)?.permissions())?;
    staged.as_file().sync_all()?;
    Ok(staged)
}
