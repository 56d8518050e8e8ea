//! # Error implementation
//! The main error types which result from normal usage.
use std::path::PathBuf;

use thiserror::Error;

/// Errors from the underlying SQLite catalog.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("Catalog missing table: '{0}'")]
    TableMissing(String),
    #[error("Table '{0}' has unexpected schema:\n{1}")]
    TableIncorrectSchema(String, String),
}

/// Errors raised while loading the YAML configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file missing: '{}'", path.display())]
    Missing { path: PathBuf },
    #[error("Failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}
