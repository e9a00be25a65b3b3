//! Uniform migration commands over interchangeable engines.
//!
//! A [`Config`] names a driver; [`new`] looks it up in the registry and
//! returns a boxed [`Driver`]. Callers never branch on which engine they got.
//!
//! ```rust,ignore
//! let mut driver = miga::driver::new(&Config {
//!     name: "migrate".into(),
//!     dialect: "postgres".into(),
//!     dsn: "postgres://localhost/app".into(),
//!     dir: "migrations".into(),
//!     table: "db_version".into(),
//! })
//! .await?;
//!
//! driver.up().await?;
//! println!("{}", driver.version().await?);
//! ```

mod database;
pub mod goose;
pub mod migrate;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use serde::Serialize;

use crate::dialect::Dialect;
use crate::error::{MigaError, MigaResult};

/// Driver name for the goose-style engine.
pub const GOOSE: &str = "goose";
/// Driver name for the migrate-style engine.
pub const MIGRATE: &str = "migrate";

/// Boxed future returned by registry constructors and `close`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Constructor = fn(Settings) -> BoxFuture<'static, MigaResult<Box<dyn Driver>>>;

/// Registered engines. Adding a backend means adding an entry here.
const REGISTRY: &[(&str, Constructor)] = &[
    (GOOSE, goose::Goose::boxed as Constructor),
    (MIGRATE, migrate::Migrate::boxed as Constructor),
];

/// Everything needed to build a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Driver name, see [`GOOSE`] and [`MIGRATE`].
    pub name: String,
    /// SQL dialect (`postgres`, `mysql`, `sqlite3`).
    pub dialect: String,
    /// Connection URL.
    pub dsn: String,
    /// Directory holding migration pairs.
    pub dir: PathBuf,
    /// Ledger table name.
    pub table: String,
}

/// Validated construction parameters handed to an engine.
#[derive(Debug, Clone)]
pub struct Settings {
    pub dialect: Dialect,
    pub dsn: String,
    pub dir: PathBuf,
    pub table: String,
}

impl Settings {
    fn from_config(config: &Config) -> MigaResult<Self> {
        let dialect: Dialect = config.dialect.parse()?;
        if config.dsn.trim().is_empty() {
            return Err(MigaError::config("dsn must not be empty"));
        }
        dialect.check_dsn(&config.dsn)?;
        if config.dir.as_os_str().is_empty() {
            return Err(MigaError::config("migrations dir must not be empty"));
        }
        if !is_identifier(&config.table) {
            return Err(MigaError::config(format!(
                "invalid version table name '{}'",
                config.table
            )));
        }
        Ok(Self {
            dialect,
            dsn: config.dsn.clone(),
            dir: config.dir.clone(),
            table: config.table.clone(),
        })
    }
}

/// The table name is spliced into SQL, so only plain (optionally schema-qualified) identifiers pass.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Whether `name` is a registered driver.
pub fn available(name: &str) -> bool {
    REGISTRY.iter().any(|(n, _)| *n == name)
}

/// Build the driver named by `config`.
///
/// The name, dialect and DSN shape are checked before any connection is
/// opened, so a bad configuration never leaves a half-built driver behind.
pub async fn new(config: &Config) -> MigaResult<Box<dyn Driver>> {
    let constructor = REGISTRY
        .iter()
        .find(|(n, _)| *n == config.name)
        .map(|(_, c)| *c)
        .ok_or_else(|| MigaError::UnsupportedDriver(config.name.clone()))?;

    let settings = Settings::from_config(config)?;
    tracing::debug!(
        "Opening {} driver ({}, table {})",
        config.name,
        settings.dialect,
        settings.table
    );
    constructor(settings).await
}

/// Applied version and dirty flag as read from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionMarker {
    pub version: u64,
    pub dirty: bool,
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Current version: {} dirty: {}", self.version, self.dirty)
    }
}

/// Parse a version argument. Only non-negative integers are accepted.
pub fn parse_version(input: &str) -> MigaResult<u64> {
    input
        .parse::<u64>()
        .map_err(|source| MigaError::InvalidVersion {
            input: input.to_string(),
            source,
        })
}

/// The uniform command surface every engine provides.
#[async_trait]
pub trait Driver: Send {
    /// Write a new up/down pair named `name` with extension `ext`.
    async fn create(&mut self, name: &str, ext: &str) -> MigaResult<()>;

    /// Apply every pending migration in ascending order.
    async fn up(&mut self) -> MigaResult<()>;

    /// Apply pending migrations up to and including `version`.
    ///
    /// Fails with [`MigaError::NothingToUpdate`] when `version` is not above
    /// the current one.
    async fn up_to(&mut self, version: &str) -> MigaResult<()>;

    /// Revert the most recently applied migration.
    ///
    /// Returns [`MigaError::NoMigrations`] when the ledger is empty.
    async fn down(&mut self) -> MigaResult<()>;

    /// Revert migrations until `version` is the current one.
    ///
    /// Fails with [`MigaError::NothingToUpdate`] when `version` is not below
    /// the current one.
    async fn down_to(&mut self, version: &str) -> MigaResult<()>;

    /// Revert and re-apply the current migration.
    ///
    /// A dirty ledger is force-cleared at the current version first. That is
    /// an unchecked assertion that the schema matches the recorded version;
    /// if the interrupted script left partial changes behind, redo will run
    /// the down script against them.
    async fn redo(&mut self) -> MigaResult<()>;

    /// Revert everything.
    async fn reset(&mut self) -> MigaResult<()>;

    /// Same as [`Driver::version`].
    async fn status(&mut self) -> MigaResult<VersionMarker>;

    /// Read the ledger.
    async fn version(&mut self) -> MigaResult<VersionMarker>;

    /// Close the connection gracefully. Dropping the driver also releases it.
    fn close(self: Box<Self>) -> BoxFuture<'static, MigaResult<()>>;
}

/// `up_to` only moves forward.
pub(crate) fn ensure_forward(target: u64, current: u64) -> MigaResult<()> {
    if target <= current {
        return Err(MigaError::NothingToUpdate { current });
    }
    Ok(())
}

/// `down_to` only moves backward.
pub(crate) fn ensure_backward(target: u64, current: u64) -> MigaResult<()> {
    if target >= current {
        return Err(MigaError::NothingToUpdate { current });
    }
    Ok(())
}
