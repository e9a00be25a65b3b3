//! Migration files on disk.
//!
//! A migrations directory is flat. Every version is a pair of scripts:
//!
//! ```text
//! migrations/
//! ├── 20251231093400_add_users.up.sql
//! └── 20251231093400_add_users.down.sql
//! ```
//!
//! The leading integer is the ordering key. Files that do not follow the
//! `<version>_<name>.<up|down>.<ext>` shape are ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{MigaError, MigaResult};

/// Which way a script moves the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn suffix(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// One version with its up and down scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u64,
    pub name: String,
    pub up: Option<PathBuf>,
    pub down: Option<PathBuf>,
}

impl Migration {
    /// Path of the script for `direction`, or a `MissingScript` error.
    pub fn script(&self, direction: Direction) -> MigaResult<&Path> {
        let path = match direction {
            Direction::Up => self.up.as_deref(),
            Direction::Down => self.down.as_deref(),
        };
        path.ok_or(MigaError::MissingScript {
            version: self.version,
            direction,
        })
    }

    /// Read the script for `direction`.
    pub fn read(&self, direction: Direction) -> MigaResult<String> {
        Ok(std::fs::read_to_string(self.script(direction)?)?)
    }

    /// File name used in log lines.
    pub fn file_name(&self, direction: Direction) -> String {
        self.script(direction)
            .ok()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}_{}.{}", self.version, self.name, direction))
    }
}

/// All migrations found in a directory, ordered by version.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: BTreeMap<u64, Migration>,
}

impl MigrationSet {
    /// Scan `dir` for migration scripts. A missing directory is an empty set.
    pub fn load(dir: &Path) -> MigaResult<Self> {
        let mut set = Self::default();
        if !dir.exists() {
            return Ok(set);
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((version, name, direction)) = parse_file_name(file_name) else {
                continue;
            };

            let migration = set.migrations.entry(version).or_insert_with(|| Migration {
                version,
                name: name.to_string(),
                up: None,
                down: None,
            });
            let slot = match direction {
                Direction::Up => &mut migration.up,
                Direction::Down => &mut migration.down,
            };
            if slot.is_some() {
                return Err(MigaError::DuplicateMigration {
                    version,
                    direction,
                    path,
                });
            }
            *slot = Some(path);
        }

        Ok(set)
    }

    pub fn get(&self, version: u64) -> Option<&Migration> {
        self.migrations.get(&version)
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Ascending iteration.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    /// Last migration strictly before `version`.
    pub fn prev(&self, version: u64) -> Option<&Migration> {
        self.migrations.range(..version).next_back().map(|(_, m)| m)
    }

    /// Lowest version at or above `from` that no migration uses.
    fn first_free(&self, from: u64) -> MigaResult<u64> {
        let mut version = from;
        while self.migrations.contains_key(&version) {
            version = version
                .checked_add(1)
                .ok_or(MigaError::VersionOutOfRange(version))?;
        }
        Ok(version)
    }

    /// Migrations in `(after, until]`, ascending.
    pub fn pending(&self, after: Option<u64>, until: Option<u64>) -> Vec<&Migration> {
        self.migrations
            .values()
            .filter(|m| after.is_none_or(|a| m.version > a))
            .filter(|m| until.is_none_or(|u| m.version <= u))
            .collect()
    }
}

/// Split `<version>_<name>.<up|down>.<ext>` into its parts.
fn parse_file_name(file_name: &str) -> Option<(u64, &str, Direction)> {
    let (stem, _ext) = file_name.rsplit_once('.')?;
    let (base, suffix) = stem.rsplit_once('.')?;
    let direction = match suffix {
        "up" => Direction::Up,
        "down" => Direction::Down,
        _ => return None,
    };
    let (version, name) = match base.split_once('_') {
        Some((v, n)) => (v, n),
        None => (base, ""),
    };
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((version.parse().ok()?, name, direction))
}

/// Paths written by [`create_pair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPair {
    pub up: PathBuf,
    pub down: PathBuf,
}

/// Create a new up/down pair stamped with the current UTC time.
///
/// Two creates within the same second would share a timestamp, so the
/// stamp moves forward past any version already on disk.
pub fn create_pair(dir: &Path, name: &str, ext: &str) -> MigaResult<CreatedPair> {
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
    let stamp = parse_prefix(&timestamp)?;
    let version = MigrationSet::load(dir)?.first_free(stamp)?;
    create_pair_at(dir, &version.to_string(), name, ext)
}

fn parse_prefix(prefix: &str) -> MigaResult<u64> {
    prefix.parse().map_err(|source| MigaError::InvalidVersion {
        input: prefix.to_string(),
        source,
    })
}

/// Create a new up/down pair with an explicit ordering prefix.
///
/// Existing files are never overwritten: if either target already exists the
/// call fails and nothing new is left behind. A prefix already used by
/// another migration is rejected, since the directory would no longer load.
pub fn create_pair_at(dir: &Path, prefix: &str, name: &str, ext: &str) -> MigaResult<CreatedPair> {
    let version = parse_prefix(prefix)?;
    let name = name.trim().replace(' ', "_");
    if name.is_empty() {
        return Err(MigaError::config("migration name must not be empty"));
    }
    let ext = ext.trim().trim_start_matches('.');
    if ext.is_empty() {
        return Err(MigaError::config("migration extension must not be empty"));
    }
    // the direction is read from the second-to-last dot
    if ext.contains('.') {
        return Err(MigaError::config(format!(
            "migration extension '{}' must not contain a dot",
            ext
        )));
    }

    if let Some(existing) = MigrationSet::load(dir)?.get(version) {
        return Err(MigaError::VersionTaken {
            version,
            name: existing.name.clone(),
        });
    }

    std::fs::create_dir_all(dir)?;

    let base = format!("{}_{}", prefix, name);
    let up = dir.join(format!("{}.{}.{}", base, Direction::Up, ext));
    let down = dir.join(format!("{}.{}.{}", base, Direction::Down, ext));

    write_new(&up, &format!("-- {} (up)\n", base))?;
    if let Err(e) = write_new(&down, &format!("-- {} (down)\n", base)) {
        let _ = std::fs::remove_file(&up);
        return Err(e);
    }

    tracing::info!("Created {}", up.display());
    tracing::info!("Created {}", down.display());

    Ok(CreatedPair { up, down })
}

fn write_new(path: &Path, contents: &str) -> MigaResult<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}
