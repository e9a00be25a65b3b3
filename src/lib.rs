//! # miga: one command surface for two migration engines
//!
//! miga drives schema migrations through either a goose-style or a
//! migrate-style engine. Both read the same directory of up/down pairs and
//! answer the same nine commands, so switching engines is a config change.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use miga::prelude::*;
//!
//! let config = MigaConfig::load(None)?;
//! let mut driver = miga::driver::new(&config.migrations()).await?;
//!
//! driver.up_to("20240101120000").await?;
//! let marker = driver.version().await?;
//! // => Current version: 20240101120000 dirty: false
//! ```
//!
//! ## Engines
//!
//! | Driver    | Ledger                              | Dirty flag | Lock              |
//! |-----------|-------------------------------------|------------|-------------------|
//! | `goose`   | one row per applied version         | never      | per-script tx     |
//! | `migrate` | single `(version, dirty)` row       | yes        | advisory/GET_LOCK |

pub mod config;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod logger;
pub mod migration;

pub mod prelude {
    pub use crate::config::{MigaConfig, Overrides};
    pub use crate::dialect::Dialect;
    pub use crate::driver::{Config, Driver, VersionMarker, available};
    pub use crate::error::*;
    pub use crate::migration::{Direction, Migration, MigrationSet};
}
