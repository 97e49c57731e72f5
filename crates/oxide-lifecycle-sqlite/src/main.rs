//! oxide-lifecycle CLI
//!
//! Command-line tool for managing the lifecycle of a SQLite database.

use std::path::PathBuf;

use anyhow::{bail, ensure};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use oxide_lifecycle::prelude::*;
use oxide_lifecycle_sqlite::{
    SqliteDbConnection, SqliteOptions, SqliteProvider, sqlite_manager, timestamped_backup_path,
};

/// Schema lifecycle management for SQLite databases.
#[derive(Parser)]
#[command(name = "oxide-lifecycle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database file.
    #[arg(short, long, env = "DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Directory of `*.sql` batch scripts.
    #[arg(short, long)]
    scripts: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the detected state and version.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create the schema of a new database.
    Create,

    /// Upgrade the schema.
    Upgrade {
        /// Version to stop at (newest if not specified).
        #[arg(short, long)]
        to: Option<i64>,
    },

    /// Run database maintenance.
    Cleanup,

    /// Write a backup of the database.
    Backup {
        /// Backup file (`<database>.<timestamp>.bak` if not specified).
        #[arg(short, long)]
        target: Option<PathBuf>,
    },

    /// Replace the database with a backup.
    Restore {
        /// Backup file.
        source: PathBuf,
    },

    /// List the available batches.
    Batches,

    /// Run a batch by name.
    Exec {
        /// Batch name.
        name: String,

        /// Run the batch in a transaction.
        #[arg(long)]
        transaction: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut options = match &cli.config {
        Some(path) => SqliteOptions::load(path)?,
        None => SqliteOptions::default(),
    };
    if let Some(database) = cli.database {
        options.database = database;
    }
    if let Some(scripts) = cli.scripts {
        options.scripts = Some(scripts);
    }

    let mut manager = sqlite_manager(&options)?;
    manager.initialize()?;

    match cli.command {
        Commands::Status { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&manager.status())?);
            } else {
                print_status(&manager, &options);
            }
        }

        Commands::Create => {
            ensure!(
                manager.can_create(),
                "Cannot create database in state {} (version {})",
                manager.state(),
                manager.version()
            );
            ensure!(manager.create()?, "Create failed");
            info!(state = %manager.state(), version = manager.version(), "Database created");
        }

        Commands::Upgrade { to } => {
            if manager.state() == State::Ok && to.is_none() {
                info!(version = manager.version(), "Database is up to date");
            } else {
                let upgraded = match to {
                    Some(target) => manager.upgrade_to(target)?,
                    None => {
                        ensure!(
                            manager.can_upgrade(),
                            "Cannot upgrade database in state {} (version {})",
                            manager.state(),
                            manager.version()
                        );
                        manager.upgrade()?
                    }
                };
                ensure!(
                    upgraded,
                    "Upgrade stopped at version {}",
                    manager.version()
                );
                info!(state = %manager.state(), version = manager.version(), "Database upgraded");
            }
        }

        Commands::Cleanup => {
            ensure!(manager.cleanup()?, "Cleanup failed");
        }

        Commands::Backup { target } => {
            let target =
                target.unwrap_or_else(|| timestamped_backup_path(&options.database, Local::now()));
            if !manager.backup(&BackupLocation::File(target.clone()))? {
                bail!("Backup to {} failed", target.display());
            }
            println!("{}", target.display());
        }

        Commands::Restore { source } => {
            if !manager.restore(&BackupLocation::File(source.clone()))? {
                bail!("Restore from {} failed", source.display());
            }
            info!(state = %manager.state(), version = manager.version(), "Database restored");
        }

        Commands::Batches => {
            let names = manager.batch_names();
            if names.is_empty() {
                info!("No batches found.");
            }
            let pattern = options.lifecycle.upgrade_pattern()?;
            for name in names {
                let marker = if pattern.is_match(&name) {
                    "U"
                } else if name == options.lifecycle.create_batch_name {
                    "C"
                } else {
                    " "
                };
                println!(" [{marker}] {name}");
            }
        }

        Commands::Exec { name, transaction } => {
            let mut batch = manager.batch(&name)?;
            manager.execute_batch(&mut batch, transaction, true)?;
            print_results(&batch);
        }
    }

    manager.close();
    Ok(())
}

fn print_status(manager: &DatabaseManager<SqliteProvider>, options: &SqliteOptions) {
    let status = manager.status();
    println!("\nDatabase: {}", options.database.display());
    println!("{:-<60}", "");
    println!(" State:    {}", status.state);
    println!(" Version:  {}", status.version);
    if manager.upgrader().is_empty() {
        println!(" Upgrades: none");
    } else {
        println!(" Upgrades: {} -> {}", status.min_version, status.max_version);
    }
    println!(
        " Allowed:  create={} upgrade={} cleanup={} backup={} restore={}",
        status.can_create,
        status.can_upgrade,
        status.can_cleanup,
        status.can_backup,
        status.can_restore
    );
    println!();
}

fn print_results(batch: &Batch<SqliteDbConnection>) {
    for (index, command) in batch.commands().iter().enumerate() {
        let values = if command.results().is_empty() {
            command.result().map(ToString::to_string).unwrap_or_default()
        } else {
            command
                .results()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" | ")
        };
        println!(" {index:>3}: {values}");
    }
}
