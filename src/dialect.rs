//! SQL dialects understood by the migration engines.

use std::fmt;
use std::str::FromStr;

use crate::error::MigaError;

/// The database product a driver talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Canonical configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite3",
        }
    }

    /// Bind parameter for the `n`-th (1-based) argument.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Column type for ledger flags. The Any driver maps neither SQLite
    /// `BOOLEAN` nor MySQL `TINYINT(1)`, so those store the flag as an integer.
    pub fn flag_type(&self) -> &'static str {
        match self {
            Dialect::Postgres => "boolean",
            Dialect::MySql | Dialect::Sqlite => "INTEGER",
        }
    }

    /// URL schemes accepted as a DSN for this dialect.
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Dialect::Postgres => &["postgres://", "postgresql://"],
            Dialect::MySql => &["mysql://", "mariadb://"],
            Dialect::Sqlite => &["sqlite:"],
        }
    }

    /// Reject a DSN that would route sqlx to a different database product.
    pub fn check_dsn(&self, dsn: &str) -> Result<(), MigaError> {
        if self.schemes().iter().any(|s| dsn.starts_with(s)) {
            Ok(())
        } else {
            Err(MigaError::config(format!(
                "dsn does not match dialect {} (expected {})",
                self.name(),
                self.schemes().join(" or ")
            )))
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = MigaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            "sqlite3" | "sqlite" => Ok(Dialect::Sqlite),
            other => Err(MigaError::UnsupportedDialect(other.to_string())),
        }
    }
}
