//! Runtime configuration for catalog entry points.
//!
//! # Responsibility
//! - Provide defaults for database path, log level and log directory.
//! - Apply `CATALOG_*` environment overrides and validate them.
//!
//! # Invariants
//! - `log_level` is always a canonical level token.
//! - `log_dir`, when set, is absolute.

use crate::logging::{default_log_level, normalize_level};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_DB_PATH: &str = "CATALOG_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "CATALOG_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "CATALOG_LOG_DIR";

const DEFAULT_DB_FILE: &str = "catalog.sqlite3";

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable is set but blank.
    EmptyValue { key: &'static str },
    InvalidLogLevel { value: String },
    RelativeLogDir { value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyValue { key } => write!(f, "{key} must not be blank"),
            Self::InvalidLogLevel { value } => write!(
                f,
                "{ENV_LOG_LEVEL} `{value}` is not one of trace|debug|info|warn|error"
            ),
            Self::RelativeLogDir { value } => {
                write!(f, "{ENV_LOG_DIR} must be an absolute path, got `{value}`")
            }
        }
    }
}

impl Error for ConfigError {}

/// Settings shared by binaries embedding the catalog core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub log_level: &'static str,
    /// File logging is off when `None`.
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup(key)` for each `CATALOG_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = non_blank(ENV_DB_PATH, lookup(ENV_DB_PATH))? {
            config.db_path = PathBuf::from(value);
        }
        if let Some(value) = non_blank(ENV_LOG_LEVEL, lookup(ENV_LOG_LEVEL))? {
            config.log_level =
                normalize_level(&value).map_err(|_| ConfigError::InvalidLogLevel { value })?;
        }
        if let Some(value) = non_blank(ENV_LOG_DIR, lookup(ENV_LOG_DIR))? {
            let path = PathBuf::from(&value);
            if !path.is_absolute() {
                return Err(ConfigError::RelativeLogDir { value });
            }
            config.log_dir = Some(path);
        }

        Ok(config)
    }
}

fn non_blank(key: &'static str, value: Option<String>) -> Result<Option<String>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::EmptyValue { key });
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}
