//! Catalog storage: connection setup and schema versioning.
//!
//! # Responsibility
//! - Hand out SQLite connections configured for the taxonomy schema.
//! - Keep `taxonomies`, `taxons` and `taxon_rules` at the version this
//!   binary was built against.
//!
//! # Invariants
//! - The schema version lives in `PRAGMA user_version`.
//! - Stale markers (`marked_for_rebuild`, `marked_for_regenerate_products`)
//!   exist from the first migration, so owed work survives restarts.
//! - Repositories accept only connections at exactly the latest version.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Storage bootstrap failure.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Schema is ahead of every migration this binary knows.
    SchemaTooNew { found: u32, supported: u32 },
    /// Schema is not at the version repositories are written against.
    SchemaMismatch { expected: u32, actual: u32 },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "catalog storage error: {err}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "catalog schema version {found} is newer than this build supports ({supported})"
            ),
            Self::SchemaMismatch { expected, actual } => write!(
                f,
                "catalog storage requires schema version {expected}, got {actual}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } | Self::SchemaMismatch { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
