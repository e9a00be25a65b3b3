//! Connection and row helpers shared by the engines.

use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Connection, Executor, Row};

use crate::error::{MigaError, MigaResult};

use super::Settings;

/// Open the single connection an engine owns for its lifetime.
pub(crate) async fn connect(settings: &Settings) -> MigaResult<AnyConnection> {
    // Install default drivers
    sqlx::any::install_default_drivers();

    let conn = AnyConnection::connect(&settings.dsn).await?;
    tracing::debug!("Connected to {} database", settings.dialect);
    Ok(conn)
}

/// Run a migration script. Scripts may hold several statements, so they go
/// through the unprepared path.
pub(crate) async fn execute_script(conn: &mut AnyConnection, sql: &str) -> MigaResult<()> {
    if sql.trim().is_empty() {
        return Ok(());
    }
    conn.execute(sql).await?;
    Ok(())
}

/// Ledger columns are signed.
pub(crate) fn to_db_version(version: u64) -> MigaResult<i64> {
    i64::try_from(version).map_err(|_| MigaError::VersionOutOfRange(version))
}

pub(crate) fn get_version(row: &AnyRow, index: usize) -> MigaResult<u64> {
    let raw: i64 = row.try_get(index)?;
    u64::try_from(raw).map_err(|_| MigaError::Ledger(format!("negative version {} in ledger", raw)))
}

/// Flags are BOOL on Postgres and integers on MySQL and SQLite.
pub(crate) fn get_flag(row: &AnyRow, index: usize) -> MigaResult<bool> {
    match row.try_get::<bool, _>(index) {
        Ok(flag) => Ok(flag),
        Err(_) => Ok(row.try_get::<i64, _>(index)? != 0),
    }
}
