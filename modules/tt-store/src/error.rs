//! Error type shared by every store operation.

use std::path::PathBuf;

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrong parameter or result shape handed to the executor
    #[error("type error: {0}")]
    Type(String),

    #[error("no value bound for parameter :{0}")]
    MissingParameter(String),

    #[error("{table}: missing required columns: {}", .columns.join(", "))]
    MissingColumns {
        table: &'static str,
        columns: Vec<String>,
    },

    #[error("{table}: unknown columns: {}", .columns.join(", "))]
    UnknownColumns {
        table: &'static str,
        columns: Vec<String>,
    },

    #[error("cannot build an empty {0} clause")]
    EmptyClause(&'static str),

    #[error("partition scale must be between 1 and 40, got {0}")]
    InvalidPartitionScale(usize),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("cannot decode column {column}: {message}")]
    Decode { column: String, message: String },

    #[error("{table}: write for {key} touched no rows")]
    NothingWritten { table: &'static str, key: String },

    #[error("batch write to {table} rolled back: {source}")]
    BatchAborted {
        table: &'static str,
        #[source]
        source: Box<StoreError>,
    },

    #[error("unable to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// True for UNIQUE / PRIMARY KEY / NOT NULL / CHECK failures reported by SQLite
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            StoreError::BatchAborted { source, .. } => source.is_constraint_violation(),
            _ => false,
        }
    }

    pub(crate) fn batch(table: &'static str, source: StoreError) -> Self {
        match source {
            already @ StoreError::BatchAborted { .. } => already,
            other => StoreError::BatchAborted {
                table,
                source: Box::new(other),
            },
        }
    }
}
