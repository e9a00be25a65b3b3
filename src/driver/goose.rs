//! Goose-style engine.
//!
//! The ledger keeps one row per applied version:
//!
//! ```text
//! id | version_id | is_applied | tstamp
//! ```
//!
//! A version-0 row is seeded when the table is created. The current version
//! is the newest row whose version was not later marked unapplied. Every
//! script runs inside its own transaction together with its ledger write.
//! There is no dirty flag: a failed script rolls back and leaves the ledger
//! untouched.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{AnyConnection, Connection, Row};

use crate::dialect::Dialect;
use crate::error::{MigaError, MigaResult};
use crate::migration::{self, Direction, Migration, MigrationSet};

use super::database;
use super::{BoxFuture, Driver, Settings, VersionMarker};

/// Goose-style migration driver.
pub struct Goose {
    conn: AnyConnection,
    dialect: Dialect,
    dir: PathBuf,
    table: String,
}

impl Goose {
    /// Connect and make sure the version table exists.
    pub async fn connect(settings: Settings) -> MigaResult<Self> {
        let conn = database::connect(&settings).await?;
        let mut goose = Self {
            conn,
            dialect: settings.dialect,
            dir: settings.dir,
            table: settings.table,
        };
        goose.ensure_table().await?;
        Ok(goose)
    }

    pub(crate) fn boxed(settings: Settings) -> BoxFuture<'static, MigaResult<Box<dyn Driver>>> {
        Box::pin(async move { Ok(Box::new(Self::connect(settings).await?) as Box<dyn Driver>) })
    }

    fn create_table_sql(&self) -> String {
        match self.dialect {
            Dialect::Postgres | Dialect::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id serial NOT NULL, \
                 version_id bigint NOT NULL, \
                 is_applied {} NOT NULL, \
                 tstamp timestamp NULL default now(), \
                 PRIMARY KEY(id))",
                self.table,
                self.dialect.flag_type()
            ),
            Dialect::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 version_id BIGINT NOT NULL, \
                 is_applied {} NOT NULL, \
                 tstamp TIMESTAMP DEFAULT (datetime('now')))",
                self.table,
                self.dialect.flag_type()
            ),
        }
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version_id, is_applied) VALUES ({}, {})",
            self.table,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        )
    }

    fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE version_id = {}",
            self.table,
            self.dialect.placeholder(1)
        )
    }

    async fn ensure_table(&mut self) -> MigaResult<()> {
        let create = self.create_table_sql();
        database::execute_script(&mut self.conn, &create).await?;

        let count_sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query(&count_sql)
            .fetch_one(&mut self.conn)
            .await?
            .try_get(0)?;
        if count == 0 {
            let insert = self.insert_sql();
            sqlx::query(&insert)
                .bind(0_i64)
                .bind(true)
                .execute(&mut self.conn)
                .await?;
            tracing::debug!("Seeded version table {}", self.table);
        }
        Ok(())
    }

    /// Walk the ledger newest first. A version seen unapplied is skipped for
    /// the rest of the walk.
    async fn current_version(&mut self) -> MigaResult<u64> {
        let sql = format!(
            "SELECT version_id, is_applied FROM {} ORDER BY id DESC",
            self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&mut self.conn).await?;

        let mut skip = HashSet::new();
        for row in &rows {
            let version = database::get_version(row, 0)?;
            if skip.contains(&version) {
                continue;
            }
            if database::get_flag(row, 1)? {
                return Ok(version);
            }
            skip.insert(version);
        }
        Ok(0)
    }

    /// Run one script and record it in the same transaction.
    async fn apply(&mut self, migration: &Migration, direction: Direction) -> MigaResult<()> {
        let script = migration.read(direction)?;
        let version = database::to_db_version(migration.version)?;
        let record = match direction {
            Direction::Up => self.insert_sql(),
            Direction::Down => self.delete_sql(),
        };

        let started = Instant::now();
        let mut tx = self.conn.begin().await?;
        database::execute_script(&mut *tx, &script).await?;
        match direction {
            Direction::Up => {
                sqlx::query(&record)
                    .bind(version)
                    .bind(true)
                    .execute(&mut *tx)
                    .await?;
            }
            Direction::Down => {
                sqlx::query(&record).bind(version).execute(&mut *tx).await?;
            }
        }
        tx.commit().await?;

        tracing::info!(
            "OK   {} ({:.2?})",
            migration.file_name(direction),
            started.elapsed()
        );
        Ok(())
    }

    async fn down_one(&mut self, set: &MigrationSet) -> MigaResult<()> {
        let current = self.current_version().await?;
        if current == 0 {
            return Err(MigaError::NoMigrations);
        }
        let migration = set
            .get(current)
            .ok_or(MigaError::MissingMigration(current))?;
        self.apply(migration, Direction::Down).await
    }

    async fn up_through(
        &mut self,
        set: &MigrationSet,
        current: u64,
        until: Option<u64>,
    ) -> MigaResult<()> {
        let pending = set.pending(Some(current), until);
        if pending.is_empty() {
            tracing::info!("no migrations to run. current version: {}", current);
            return Ok(());
        }
        for migration in pending {
            self.apply(migration, Direction::Up).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for Goose {
    async fn create(&mut self, name: &str, ext: &str) -> MigaResult<()> {
        migration::create_pair(&self.dir, name, ext)?;
        Ok(())
    }

    async fn up(&mut self) -> MigaResult<()> {
        let set = MigrationSet::load(&self.dir)?;
        let current = self.current_version().await?;
        self.up_through(&set, current, None).await
    }

    async fn up_to(&mut self, version: &str) -> MigaResult<()> {
        let target = super::parse_version(version)?;
        let current = self.current_version().await?;
        super::ensure_forward(target, current)?;

        let set = MigrationSet::load(&self.dir)?;
        self.up_through(&set, current, Some(target)).await
    }

    async fn down(&mut self) -> MigaResult<()> {
        let set = MigrationSet::load(&self.dir)?;
        self.down_one(&set).await
    }

    async fn down_to(&mut self, version: &str) -> MigaResult<()> {
        let target = super::parse_version(version)?;
        let current = self.current_version().await?;
        super::ensure_backward(target, current)?;

        let set = MigrationSet::load(&self.dir)?;
        while self.current_version().await? > target {
            self.down_one(&set).await?;
        }
        Ok(())
    }

    async fn redo(&mut self) -> MigaResult<()> {
        let marker = self.version().await?;
        if marker.version == 0 {
            return Err(MigaError::NoMigrations);
        }

        let set = MigrationSet::load(&self.dir)?;
        let migration = set
            .get(marker.version)
            .ok_or(MigaError::MissingMigration(marker.version))?;
        self.apply(migration, Direction::Down).await?;
        self.apply(migration, Direction::Up).await
    }

    async fn reset(&mut self) -> MigaResult<()> {
        let set = MigrationSet::load(&self.dir)?;
        loop {
            match self.down_one(&set).await {
                Ok(()) => {}
                Err(MigaError::NoMigrations) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn status(&mut self) -> MigaResult<VersionMarker> {
        self.version().await
    }

    async fn version(&mut self) -> MigaResult<VersionMarker> {
        let version = self.current_version().await?;
        tracing::debug!("goose: version {}", version);
        Ok(VersionMarker {
            version,
            dirty: false,
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, MigaResult<()>> {
        Box::pin(async move {
            self.conn.close().await?;
            Ok(())
        })
    }
}
