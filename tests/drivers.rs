//! End-to-end tests for both drivers against file-backed SQLite databases.
//!
//! Postgres and MySQL go through the same engine code with a different
//! placeholder style and lock primitive; SQLite needs no server.

use std::path::{Path, PathBuf};

use miga::driver::{self, Config, Driver, GOOSE, MIGRATE, VersionMarker};
use miga::error::MigaError;
use pretty_assertions::assert_eq;
use sqlx::{Connection, SqliteConnection};
use tempfile::TempDir;

const TABLES: [&str; 5] = ["users", "posts", "tags", "comments", "likes"];

struct Fixture {
    _tmp: TempDir,
    dir: PathBuf,
    dsn: String,
}

impl Fixture {
    /// Five migrations, each creating one table.
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("migrations");
        std::fs::create_dir_all(&dir).unwrap();

        for (i, table) in TABLES.iter().enumerate() {
            let version = i + 1;
            write(
                &dir,
                &format!("{}_create_{}.up.sql", version, table),
                &format!("CREATE TABLE {} (id INTEGER PRIMARY KEY, note TEXT);", table),
            );
            write(
                &dir,
                &format!("{}_create_{}.down.sql", version, table),
                &format!("DROP TABLE {};", table),
            );
        }

        let dsn = format!("sqlite://{}?mode=rwc", tmp.path().join("app.db").display());
        Self { _tmp: tmp, dir, dsn }
    }

    fn config(&self, name: &str) -> Config {
        Config {
            name: name.to_string(),
            dialect: "sqlite3".to_string(),
            dsn: self.dsn.clone(),
            dir: self.dir.clone(),
            table: "db_version".to_string(),
        }
    }

    async fn open(&self, name: &str) -> Box<dyn Driver> {
        driver::new(&self.config(name)).await.unwrap()
    }

    async fn table_exists(&self, table: &str) -> bool {
        let mut conn = SqliteConnection::connect(&self.dsn).await.unwrap();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&mut conn)
        .await
        .unwrap();
        count == 1
    }

    async fn execute(&self, sql: &str) {
        let mut conn = SqliteConnection::connect(&self.dsn).await.unwrap();
        sqlx::query(sql).execute(&mut conn).await.unwrap();
    }
}

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

fn marker(version: u64) -> VersionMarker {
    VersionMarker {
        version,
        dirty: false,
    }
}

async fn check_up_to_and_down_to(name: &str) {
    let fx = Fixture::new();
    let mut driver = fx.open(name).await;

    assert_eq!(driver.version().await.unwrap(), marker(0));
    driver.up().await.unwrap();
    assert_eq!(driver.version().await.unwrap(), marker(5));
    assert_eq!(driver.status().await.unwrap(), marker(5));

    let err = driver.up_to("3").await.unwrap_err();
    assert_eq!(err.to_string(), "Nothing to update, current version: 5");
    assert!(matches!(err, MigaError::NothingToUpdate { current: 5 }));
    assert_eq!(driver.version().await.unwrap(), marker(5));

    driver.down_to("3").await.unwrap();
    assert_eq!(driver.version().await.unwrap(), marker(3));
    assert!(fx.table_exists("tags").await);
    assert!(!fx.table_exists("comments").await);
    assert!(!fx.table_exists("likes").await);

    let err = driver.down_to("3").await.unwrap_err();
    assert_eq!(err.current_version(), Some(3));

    driver.up_to("4").await.unwrap();
    assert_eq!(driver.version().await.unwrap(), marker(4));
    assert!(fx.table_exists("comments").await);

    driver.close().await.unwrap();
}

async fn check_invalid_versions(name: &str) {
    let fx = Fixture::new();
    let mut driver = fx.open(name).await;
    driver.up().await.unwrap();

    for input in ["abc", "-1", "3.5", ""] {
        assert!(matches!(
            driver.up_to(input).await,
            Err(MigaError::InvalidVersion { .. })
        ));
        assert!(matches!(
            driver.down_to(input).await,
            Err(MigaError::InvalidVersion { .. })
        ));
    }
    assert_eq!(driver.version().await.unwrap(), marker(5));
}

async fn check_down_redo_reset(name: &str) {
    let fx = Fixture::new();
    let mut driver = fx.open(name).await;

    assert!(matches!(driver.down().await, Err(MigaError::NoMigrations)));

    driver.up_to("3").await.unwrap();
    driver.down().await.unwrap();
    assert_eq!(driver.version().await.unwrap(), marker(2));
    assert!(!fx.table_exists("tags").await);

    driver.redo().await.unwrap();
    assert_eq!(driver.version().await.unwrap(), marker(2));
    assert!(fx.table_exists("posts").await);

    driver.reset().await.unwrap();
    assert_eq!(driver.version().await.unwrap(), marker(0));
    for table in TABLES {
        assert!(!fx.table_exists(table).await, "{} still exists", table);
    }

    // already empty: still terminates
    driver.reset().await.unwrap();
    assert!(matches!(driver.redo().await, Err(MigaError::NoMigrations)));
}

async fn check_create(name: &str) {
    let fx = Fixture::new();
    let mut driver = fx.open(name).await;
    let before = std::fs::read_dir(&fx.dir).unwrap().count();

    driver.create("add_users", "sql").await.unwrap();

    let mut created: Vec<String> = std::fs::read_dir(&fx.dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains("_add_users."))
        .collect();
    created.sort();
    assert_eq!(std::fs::read_dir(&fx.dir).unwrap().count(), before + 2);
    assert_eq!(created.len(), 2);

    let (down, up) = (&created[0], &created[1]);
    assert!(down.ends_with("_add_users.down.sql"));
    assert!(up.ends_with("_add_users.up.sql"));
    assert_eq!(
        down.trim_end_matches("_add_users.down.sql"),
        up.trim_end_matches("_add_users.up.sql")
    );
}

async fn check_create_twice(name: &str) {
    let fx = Fixture::new();
    let mut driver = fx.open(name).await;

    driver.create("add_accounts", "sql").await.unwrap();
    driver.create("add_sessions", "sql").await.unwrap();

    let mut created = Vec::new();
    for entry in std::fs::read_dir(&fx.dir).unwrap() {
        let path = entry.unwrap().path();
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        if file.contains("_add_accounts.") || file.contains("_add_sessions.") {
            std::fs::write(&path, "SELECT 1;").unwrap();
            created.push(file);
        }
    }
    assert_eq!(created.len(), 4);

    driver.up().await.unwrap();
    let version = driver.version().await.unwrap().version;
    assert!(version > 5);
    driver.down().await.unwrap();
    driver.down().await.unwrap();
    assert_eq!(driver.version().await.unwrap(), marker(5));
}

#[tokio::test]
async fn test_goose_up_to_and_down_to() {
    check_up_to_and_down_to(GOOSE).await;
}

#[tokio::test]
async fn test_migrate_up_to_and_down_to() {
    check_up_to_and_down_to(MIGRATE).await;
}

#[tokio::test]
async fn test_goose_invalid_versions() {
    check_invalid_versions(GOOSE).await;
}

#[tokio::test]
async fn test_migrate_invalid_versions() {
    check_invalid_versions(MIGRATE).await;
}

#[tokio::test]
async fn test_goose_down_redo_reset() {
    check_down_redo_reset(GOOSE).await;
}

#[tokio::test]
async fn test_migrate_down_redo_reset() {
    check_down_redo_reset(MIGRATE).await;
}

#[tokio::test]
async fn test_goose_create_twice() {
    check_create_twice(GOOSE).await;
}

#[tokio::test]
async fn test_migrate_create_twice() {
    check_create_twice(MIGRATE).await;
}

#[tokio::test]
async fn test_goose_create() {
    check_create(GOOSE).await;
}

#[tokio::test]
async fn test_migrate_create() {
    check_create(MIGRATE).await;
}

/// A failing script rolls back with its ledger write; nothing is left dirty.
#[tokio::test]
async fn test_goose_failed_script_rolls_back() {
    let fx = Fixture::new();
    write(&fx.dir, "6_broken.up.sql", "CREATE TABLE broken (id INTEGER PRIMARY KEY);\nCREATE TABLE (;");
    write(&fx.dir, "6_broken.down.sql", "DROP TABLE broken;");

    let mut driver = fx.open(GOOSE).await;
    assert!(matches!(driver.up().await, Err(MigaError::Database(_))));
    assert_eq!(driver.version().await.unwrap(), marker(5));
    assert!(!fx.table_exists("broken").await);
}

/// A failing script leaves the ledger dirty; redo force-clears and re-runs.
#[tokio::test]
async fn test_migrate_dirty_recovery() {
    let fx = Fixture::new();
    write(&fx.dir, "6_broken.up.sql", "CREATE TABLE (;");
    write(&fx.dir, "6_broken.down.sql", "DROP TABLE IF EXISTS broken;");

    let mut driver = fx.open(MIGRATE).await;
    assert!(matches!(driver.up().await, Err(MigaError::Database(_))));
    assert_eq!(
        driver.version().await.unwrap(),
        VersionMarker {
            version: 6,
            dirty: true
        }
    );
    assert!(matches!(
        driver.up().await,
        Err(MigaError::Dirty { version: 6 })
    ));
    assert!(matches!(
        driver.down().await,
        Err(MigaError::Dirty { version: 6 })
    ));

    write(&fx.dir, "6_broken.up.sql", "CREATE TABLE broken (id INTEGER PRIMARY KEY);");
    driver.redo().await.unwrap();
    assert_eq!(driver.version().await.unwrap(), marker(6));
    assert!(fx.table_exists("broken").await);
}

#[tokio::test]
async fn test_migrate_redo_clears_dirty_flag() {
    let fx = Fixture::new();
    let mut driver = fx.open(MIGRATE).await;
    driver.up().await.unwrap();

    fx.execute("UPDATE db_version SET dirty = 1").await;
    assert!(driver.version().await.unwrap().dirty);

    driver.redo().await.unwrap();
    assert_eq!(driver.version().await.unwrap(), marker(5));
    assert!(fx.table_exists("likes").await);
}

/// A row marking a version unapplied hides that version's earlier rows.
#[tokio::test]
async fn test_goose_reads_history_rows() {
    let fx = Fixture::new();
    let mut driver = fx.open(GOOSE).await;
    driver.up_to("2").await.unwrap();

    // an older ledger format marks reverted versions instead of deleting them
    fx.execute("INSERT INTO db_version (version_id, is_applied) VALUES (2, 0)").await;
    assert_eq!(driver.version().await.unwrap(), marker(1));
}

#[tokio::test]
async fn test_migrate_unknown_target() {
    let fx = Fixture::new();
    let mut driver = fx.open(MIGRATE).await;
    assert!(matches!(
        driver.up_to("42").await,
        Err(MigaError::MissingMigration(42))
    ));
    assert_eq!(driver.version().await.unwrap(), marker(0));
}

#[tokio::test]
async fn test_seed_ledger_is_independent() {
    let fx = Fixture::new();
    let seeds = fx.dir.parent().unwrap().join("seeds");
    std::fs::create_dir_all(&seeds).unwrap();
    write(&seeds, "1_admin.up.sql", "CREATE TABLE admins (id INTEGER PRIMARY KEY);");
    write(&seeds, "1_admin.down.sql", "DROP TABLE admins;");

    let mut migrations = fx.open(MIGRATE).await;
    migrations.up().await.unwrap();

    let mut seed = driver::new(&Config {
        dir: seeds,
        table: "seed_version".to_string(),
        ..fx.config(MIGRATE)
    })
    .await
    .unwrap();
    seed.up().await.unwrap();

    assert_eq!(seed.version().await.unwrap(), marker(1));
    assert_eq!(migrations.version().await.unwrap(), marker(5));
}
