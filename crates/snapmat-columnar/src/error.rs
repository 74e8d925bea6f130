//! Error types for columnar writers.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while shaping rows or writing snapshot files.
#[derive(Error, Debug)]
pub enum ColumnarError {
    /// A column was only ever null/absent in the batch used for inference.
    #[error("cannot infer type of column '{column}': no non-empty value in first batch")]
    SchemaInference { column: String },

    /// A value or row does not match the established schema.
    #[error("column '{column}' does not conform to schema: expected {expected}, got {actual}")]
    SchemaMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    /// Schema construction rejected (duplicate, empty or reserved names).
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Inference was asked to work from zero rows.
    #[error("cannot infer schema from an empty batch")]
    EmptyBatch,

    /// Programming-contract failure, e.g. completing an unsealed collector.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// Filesystem failure at a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Parquet encoding or footer error.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow array/batch construction error.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// A producer panicked while holding a shard lock.
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl ColumnarError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ColumnarError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a storage-level failure (the WriteIO family).
    pub fn is_write_io(&self) -> bool {
        matches!(
            self,
            ColumnarError::Io { .. } | ColumnarError::Parquet(_) | ColumnarError::Arrow(_)
        )
    }
}

impl From<ColumnarError> for snapmat_common::Error {
    fn from(err: ColumnarError) -> Self {
        use snapmat_common::Error;
        match err {
            ColumnarError::SchemaInference { column } => Error::SchemaInference { column },
            ColumnarError::SchemaMismatch {
                column,
                expected,
                actual,
            } => Error::SchemaMismatch {
                column,
                expected,
                actual,
            },
            ColumnarError::EmptyBatch => Error::SchemaInference {
                column: "*".to_string(),
            },
            ColumnarError::InvalidSchema(msg) => Error::Config(msg),
            ColumnarError::PreconditionViolation(msg) => Error::PreconditionViolation(msg),
            other => Error::WriteIo(other.to_string()),
        }
    }
}

/// Result type alias for columnar operations.
pub type Result<T> = std::result::Result<T, ColumnarError>;
