//! Migrate-style engine.
//!
//! The ledger is a single row `(version, dirty)`; an empty table means no
//! migration has been applied. Before a script runs the row is set to the
//! script's version with `dirty = true`, and it is cleared once the script
//! finishes. A crash in between leaves the ledger dirty and every mutating
//! command refuses to run until the version is forced.
//!
//! Mutating commands hold a database-level lock for their whole duration:
//! `pg_advisory_lock` on Postgres and `GET_LOCK` on MySQL. SQLite has no
//! lock; its single-writer file lock is enough.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{AnyConnection, Connection};

use crate::dialect::Dialect;
use crate::error::{MigaError, MigaResult};
use crate::migration::{self, Direction, Migration, MigrationSet};

use super::database;
use super::{BoxFuture, Driver, Settings, VersionMarker};

const ADVISORY_LOCK_SALT: i64 = 1486364155;
const LOCK_TIMEOUT_SECS: i64 = 10;

/// Advisory lock id derived from the table name, so two ledgers in one
/// database do not block each other.
fn advisory_lock_id(table: &str) -> i64 {
    i64::from(crc32fast::hash(table.as_bytes())) * ADVISORY_LOCK_SALT
}

/// Migrate-style migration driver.
pub struct Migrate {
    conn: AnyConnection,
    dialect: Dialect,
    dir: PathBuf,
    table: String,
}

impl Migrate {
    /// Connect and make sure the version table exists.
    pub async fn connect(settings: Settings) -> MigaResult<Self> {
        let conn = database::connect(&settings).await?;
        let mut migrate = Self {
            conn,
            dialect: settings.dialect,
            dir: settings.dir,
            table: settings.table,
        };
        migrate.ensure_table().await?;
        Ok(migrate)
    }

    pub(crate) fn boxed(settings: Settings) -> BoxFuture<'static, MigaResult<Box<dyn Driver>>> {
        Box::pin(async move { Ok(Box::new(Self::connect(settings).await?) as Box<dyn Driver>) })
    }

    async fn ensure_table(&mut self) -> MigaResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (version BIGINT NOT NULL PRIMARY KEY, dirty {} NOT NULL)",
            self.table,
            self.dialect.flag_type()
        );
        database::execute_script(&mut self.conn, &sql).await
    }

    fn lock_id(&self) -> i64 {
        advisory_lock_id(&self.table)
    }

    fn lock_name(&self) -> String {
        format!("miga:{}", self.table)
    }

    async fn lock(&mut self) -> MigaResult<()> {
        match self.dialect {
            Dialect::Postgres => {
                // pg_advisory_lock returns void, which has no row mapping
                sqlx::query("SELECT 1 FROM (SELECT pg_advisory_lock($1)) AS l")
                    .bind(self.lock_id())
                    .execute(&mut self.conn)
                    .await?;
            }
            Dialect::MySql => {
                let acquired: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, ?)")
                    .bind(self.lock_name())
                    .bind(LOCK_TIMEOUT_SECS)
                    .fetch_one(&mut self.conn)
                    .await?;
                if acquired != Some(1) {
                    return Err(MigaError::Lock(format!(
                        "could not acquire {} within {}s",
                        self.lock_name(),
                        LOCK_TIMEOUT_SECS
                    )));
                }
            }
            Dialect::Sqlite => {}
        }
        tracing::debug!("Acquired migration lock for {}", self.table);
        Ok(())
    }

    async fn unlock(&mut self) -> MigaResult<()> {
        match self.dialect {
            Dialect::Postgres => {
                sqlx::query("SELECT pg_advisory_unlock($1)")
                    .bind(self.lock_id())
                    .execute(&mut self.conn)
                    .await?;
            }
            Dialect::MySql => {
                sqlx::query("SELECT RELEASE_LOCK(?)")
                    .bind(self.lock_name())
                    .execute(&mut self.conn)
                    .await?;
            }
            Dialect::Sqlite => {}
        }
        Ok(())
    }

    /// Release the lock whatever `result` is. The operation's own error wins
    /// over an unlock failure.
    async fn release<T>(&mut self, result: MigaResult<T>) -> MigaResult<T> {
        let unlocked = self.unlock().await;
        let value = result?;
        unlocked?;
        Ok(value)
    }

    async fn read(&mut self) -> MigaResult<Option<(u64, bool)>> {
        let sql = format!("SELECT version, dirty FROM {} LIMIT 1", self.table);
        let row = sqlx::query(&sql).fetch_optional(&mut self.conn).await?;
        match row {
            Some(row) => Ok(Some((
                database::get_version(&row, 0)?,
                database::get_flag(&row, 1)?,
            ))),
            None => Ok(None),
        }
    }

    async fn set_version(&mut self, version: Option<u64>, dirty: bool) -> MigaResult<()> {
        let delete = format!("DELETE FROM {}", self.table);
        let insert = format!(
            "INSERT INTO {} (version, dirty) VALUES ({}, {})",
            self.table,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        );

        let mut tx = self.conn.begin().await?;
        sqlx::query(&delete).execute(&mut *tx).await?;
        if let Some(version) = version {
            sqlx::query(&insert)
                .bind(database::to_db_version(version)?)
                .bind(dirty)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Current version, refusing to go on from a dirty ledger.
    async fn clean_version(&mut self) -> MigaResult<Option<u64>> {
        match self.read().await? {
            Some((version, true)) => Err(MigaError::Dirty { version }),
            Some((version, false)) => Ok(Some(version)),
            None => Ok(None),
        }
    }

    /// Mark `version` clean without running anything.
    async fn force(&mut self, version: u64) -> MigaResult<()> {
        self.set_version(Some(version), false).await?;
        tracing::warn!("Forced version {} clean", version);
        Ok(())
    }

    async fn run(
        &mut self,
        migration: &Migration,
        direction: Direction,
        resulting: Option<u64>,
    ) -> MigaResult<()> {
        let script = migration.read(direction)?;
        let started = Instant::now();

        self.set_version(Some(migration.version), true).await?;
        database::execute_script(&mut self.conn, &script).await?;
        self.set_version(resulting, false).await?;

        tracing::info!(
            "{}/{} {} ({:.2?})",
            migration.version,
            direction,
            migration.name,
            started.elapsed()
        );
        Ok(())
    }

    async fn step_up(&mut self, migration: &Migration) -> MigaResult<()> {
        self.run(migration, Direction::Up, Some(migration.version))
            .await
    }

    async fn step_down(&mut self, set: &MigrationSet, migration: &Migration) -> MigaResult<()> {
        let previous = set.prev(migration.version).map(|m| m.version);
        self.run(migration, Direction::Down, previous).await
    }

    async fn up_through(&mut self, set: &MigrationSet, until: Option<u64>) -> MigaResult<()> {
        if let Some(target) = until {
            if set.get(target).is_none() {
                return Err(MigaError::MissingMigration(target));
            }
        }

        let current = self.clean_version().await?;
        let pending = set.pending(current, until);
        if pending.is_empty() {
            tracing::info!("no change");
            return Ok(());
        }
        for migration in pending {
            self.step_up(migration).await?;
        }
        Ok(())
    }

    async fn down_one(&mut self, set: &MigrationSet) -> MigaResult<()> {
        let Some(current) = self.clean_version().await? else {
            return Err(MigaError::NoMigrations);
        };
        let migration = set
            .get(current)
            .ok_or(MigaError::MissingMigration(current))?;
        self.step_down(set, migration).await
    }

    /// Revert until `target` is current. Target 0 reverts everything.
    async fn down_through(&mut self, set: &MigrationSet, target: u64) -> MigaResult<()> {
        if target != 0 && set.get(target).is_none() {
            return Err(MigaError::MissingMigration(target));
        }
        while let Some(current) = self.clean_version().await? {
            if current <= target {
                break;
            }
            let migration = set
                .get(current)
                .ok_or(MigaError::MissingMigration(current))?;
            self.step_down(set, migration).await?;
        }
        Ok(())
    }

    async fn up_to_locked(&mut self, set: &MigrationSet, target: u64) -> MigaResult<()> {
        let current = self.read().await?.map_or(0, |(v, _)| v);
        super::ensure_forward(target, current)?;
        self.up_through(set, Some(target)).await
    }

    async fn down_to_locked(&mut self, set: &MigrationSet, target: u64) -> MigaResult<()> {
        let current = self.read().await?.map_or(0, |(v, _)| v);
        super::ensure_backward(target, current)?;
        self.down_through(set, target).await
    }

    async fn redo_locked(&mut self, set: &MigrationSet) -> MigaResult<()> {
        let Some((version, dirty)) = self.read().await? else {
            return Err(MigaError::NoMigrations);
        };
        if dirty {
            self.force(version).await?;
        }
        let migration = set
            .get(version)
            .ok_or(MigaError::MissingMigration(version))?;
        self.step_down(set, migration).await?;
        self.step_up(migration).await
    }

    async fn reset_locked(&mut self, set: &MigrationSet) -> MigaResult<()> {
        loop {
            match self.down_one(set).await {
                Ok(()) => {}
                Err(MigaError::NoMigrations) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Driver for Migrate {
    async fn create(&mut self, name: &str, ext: &str) -> MigaResult<()> {
        migration::create_pair(&self.dir, name, ext)?;
        Ok(())
    }

    async fn up(&mut self) -> MigaResult<()> {
        let set = MigrationSet::load(&self.dir)?;
        self.lock().await?;
        let result = self.up_through(&set, None).await;
        self.release(result).await
    }

    async fn up_to(&mut self, version: &str) -> MigaResult<()> {
        let target = super::parse_version(version)?;
        let set = MigrationSet::load(&self.dir)?;

        self.lock().await?;
        let result = self.up_to_locked(&set, target).await;
        self.release(result).await
    }

    async fn down(&mut self) -> MigaResult<()> {
        let set = MigrationSet::load(&self.dir)?;
        self.lock().await?;
        let result = self.down_one(&set).await;
        self.release(result).await
    }

    async fn down_to(&mut self, version: &str) -> MigaResult<()> {
        let target = super::parse_version(version)?;
        let set = MigrationSet::load(&self.dir)?;

        self.lock().await?;
        let result = self.down_to_locked(&set, target).await;
        self.release(result).await
    }

    async fn redo(&mut self) -> MigaResult<()> {
        let set = MigrationSet::load(&self.dir)?;
        self.lock().await?;
        let result = self.redo_locked(&set).await;
        self.release(result).await
    }

    async fn reset(&mut self) -> MigaResult<()> {
        let set = MigrationSet::load(&self.dir)?;
        self.lock().await?;
        let result = self.reset_locked(&set).await;
        self.release(result).await
    }

    async fn status(&mut self) -> MigaResult<VersionMarker> {
        self.version().await
    }

    async fn version(&mut self) -> MigaResult<VersionMarker> {
        let (version, dirty) = self.read().await?.unwrap_or((0, false));
        tracing::debug!("migrate: version {} dirty {}", version, dirty);
        Ok(VersionMarker { version, dirty })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, MigaResult<()>> {
        Box::pin(async move {
            self.conn.close().await?;
            Ok(())
        })
    }
}
