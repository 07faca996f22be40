//! Error types for the property loader
//!
//! Field-level problems ([`CoercionError`]) never leave the resolver,
//! record-level problems ([`WriteError`]) never leave the pipeline, and
//! everything in [`EtlError`] aborts the run before records are processed.

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::ValueType;

/// Run-level error: the run cannot start
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Mapping configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Cannot connect to database {url}: {reason}")]
    FatalConnection { url: String, reason: String },

    #[error("Failed to apply schema: {0}")]
    Schema(String),
}

/// Mapping spreadsheet is unreadable or malformed
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read mapping file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse mapping file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Mapping file {path} is missing required column(s): {}", missing.join(", "))]
    MissingColumns { path: PathBuf, missing: Vec<String> },

    #[error("Unsupported mapping file format '{extension}' for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },
}

/// A value cannot be cast to the column's declared type
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot coerce '{raw}' to {expected}")]
pub struct CoercionError {
    pub expected: ValueType,
    pub raw: String,
}

impl CoercionError {
    pub fn new(expected: ValueType, raw: impl Into<String>) -> Self {
        Self {
            expected,
            raw: raw.into(),
        }
    }
}

/// The sink rejected a record; the record is rolled back as a unit
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("record has no external identifier")]
    MissingExternalId,

    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("{table}.{column} rejected: {reason}")]
    Constraint {
        table: String,
        column: String,
        reason: String,
    },

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Records file is unreadable or is not JSON
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Failed to read records file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path} (line {line}): {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Records file {path} must contain a JSON array or JSON lines, found {found}")]
    Shape { path: PathBuf, found: String },
}

pub type Result<T> = std::result::Result<T, EtlError>;
