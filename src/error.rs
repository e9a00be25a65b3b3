//! Error types for miga.

use std::path::PathBuf;

use thiserror::Error;

use crate::migration::Direction;

/// The main error type for miga operations.
#[derive(Debug, Error)]
pub enum MigaError {
    /// The configured driver name is not registered.
    #[error("unsupported migrations driver: '{0}'")]
    UnsupportedDriver(String),

    /// The configured SQL dialect is not supported.
    #[error("Unsupported dialect: '{0}'. Expected: postgres, mysql, or sqlite3")]
    UnsupportedDialect(String),

    /// Configuration is missing a value or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A version argument was not a non-negative integer.
    #[error("Invalid version '{input}': {source}")]
    InvalidVersion {
        input: String,
        source: std::num::ParseIntError,
    },

    /// The requested target does not move the ledger in the requested direction.
    #[error("Nothing to update, current version: {current}")]
    NothingToUpdate { current: u64 },

    /// The ledger is empty, there is nothing left to revert.
    #[error("no migrations to revert")]
    NoMigrations,

    /// A previous run was interrupted while applying `version`.
    #[error("Dirty database version {version}. Fix and force version.")]
    Dirty { version: u64 },

    /// The ledger points at a version with no migration in the directory.
    #[error("no migration found for version {0}")]
    MissingMigration(u64),

    /// A migration exists but lacks the script for one direction.
    #[error("migration {version} has no {direction} script")]
    MissingScript { version: u64, direction: Direction },

    /// Two files claim the same version and direction.
    #[error("duplicate {direction} migration for version {version}: {}", path.display())]
    DuplicateMigration {
        version: u64,
        direction: Direction,
        path: PathBuf,
    },

    /// `create` was asked for a version another migration already uses.
    #[error("version {version} is already used by migration '{name}'")]
    VersionTaken { version: u64, name: String },

    /// Version does not fit the ledger's integer column.
    #[error("version {0} is out of range")]
    VersionOutOfRange(u64),

    /// The ledger table holds something the engine cannot interpret.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Could not take the database-level migration lock.
    #[error("Lock error: {0}")]
    Lock(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigaError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// The current version carried by a nothing-to-update error.
    pub fn current_version(&self) -> Option<u64> {
        match self {
            Self::NothingToUpdate { current } => Some(*current),
            _ => None,
        }
    }
}

/// Result type alias for miga operations.
pub type MigaResult<T> = Result<T, MigaError>;
