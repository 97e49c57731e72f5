#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use oxide_lifecycle::manager::DatabaseManager;
use oxide_lifecycle_sqlite::{SqliteOptions, SqliteProvider, sqlite_manager};
use tempfile::TempDir;

pub const UPGRADE0: &str = "\
CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)
GO
PRAGMA user_version = 1
";

pub const UPGRADE1: &str = "\
ALTER TABLE users ADD COLUMN email TEXT
GO
PRAGMA user_version = 2
";

pub const UPGRADE2: &str = "\
CREATE INDEX idx_users_email ON users (email)
GO
PRAGMA user_version = 3
";

/// A database path and a script directory in a temporary directory.
pub struct Fixture {
    pub dir: TempDir,
    pub database: PathBuf,
    pub scripts: PathBuf,
}

impl Fixture {
    /// A fixture with the three standard upgrade scripts.
    pub fn new() -> Self {
        let fixture = Self::empty();
        fixture.write_script("Upgrade0", UPGRADE0);
        fixture.write_script("Upgrade1", UPGRADE1);
        fixture.write_script("Upgrade2", UPGRADE2);
        fixture
    }

    /// A fixture without scripts.
    pub fn empty() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let database = dir.path().join("app.db");
        let scripts = dir.path().join("sql");
        fs::create_dir(&scripts).expect("Failed to create script dir");
        Self {
            dir,
            database,
            scripts,
        }
    }

    pub fn write_script(&self, name: &str, script: &str) {
        fs::write(self.scripts.join(format!("{name}.sql")), script)
            .unwrap_or_else(|e| panic!("Failed to write {name}.sql: {e}"));
    }

    pub fn remove_script(&self, name: &str) {
        fs::remove_file(self.scripts.join(format!("{name}.sql")))
            .unwrap_or_else(|e| panic!("Failed to remove {name}.sql: {e}"));
    }

    pub fn options(&self) -> SqliteOptions {
        SqliteOptions::new(&self.database).scripts(&self.scripts)
    }

    /// Builds and initializes a manager over the current scripts.
    pub fn manager(&self) -> DatabaseManager<SqliteProvider> {
        let mut manager = sqlite_manager(&self.options()).expect("Failed to build manager");
        manager.initialize().expect("Failed to initialize manager");
        manager
    }

    /// Builds a manager and upgrades it to the newest version.
    pub fn upgraded_manager(&self) -> DatabaseManager<SqliteProvider> {
        let mut manager = self.manager();
        assert!(manager.upgrade().expect("Upgrade returned an error"));
        manager
    }
}
