//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for taxonomies, taxons
//!   and taxon rules.
//! - Isolate SQL details from service orchestration.
//!
//! # Invariants
//! - Multi-statement writes run in one `IMMEDIATE` transaction.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Writes that owe derived-state recomputation set the matching stale
//!   marker in the same transaction.

pub mod rule_repo;
pub mod taxonomy_repo;

use crate::db::DbError;
use crate::model::taxonomy::{TaxonId, TaxonomyId};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by catalog repositories.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    TaxonomyNotFound(TaxonomyId),
    TaxonNotFound(TaxonId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::TaxonomyNotFound(id) => write!(f, "taxonomy not found: {id}"),
            Self::TaxonNotFound(id) => write!(f, "taxon not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid catalog data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::TaxonomyNotFound(_) | Self::TaxonNotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Persisted record of derived-state work that has not completed yet.
///
/// Markers are set by the primary write and cleared once the matching
/// collaborator call succeeds, so a failed deferred phase is retried by the
/// next unit of work.
pub trait StaleWorkRepository {
    /// Taxonomies whose hierarchy rebuild is still owed.
    fn stale_hierarchies(&self) -> RepoResult<Vec<TaxonomyId>>;
    /// Taxons whose product regeneration is still owed.
    fn stale_product_sets(&self) -> RepoResult<Vec<TaxonId>>;
    fn clear_hierarchy_marker(&self, taxonomy_uuid: TaxonomyId) -> RepoResult<()>;
    fn clear_product_marker(&self, taxon_uuid: TaxonId) -> RepoResult<()>;
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_flag(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid flag value `{other}` in {column}"
        ))),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
