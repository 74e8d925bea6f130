//! Error types for the snapshot materializer.

use thiserror::Error;

/// Result type alias for snapshot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for rebuild runs.
///
/// Writer crates keep their own error enums and convert into this one at the
/// rebuild boundary, so the scheduler logs a single shape.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Schema errors (20-29)
    #[error("cannot infer type of column '{column}': no non-empty value in first batch")]
    SchemaInference { column: String },

    #[error("column '{column}' does not conform to schema: expected {expected}, got {actual}")]
    SchemaMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    // Write errors (30-39)
    #[error("snapshot write failed: {0}")]
    WriteIo(String),

    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    // Source errors (40-49)
    #[error("row source failed: {0}")]
    Source(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::SchemaInference { .. } => 20,
            Error::SchemaMismatch { .. } => 21,
            Error::WriteIo(_) => 30,
            Error::PreconditionViolation(_) => 31,
            Error::Source(_) => 40,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Whether this error indicates a programming-contract failure rather
    /// than a data or environment problem.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::PreconditionViolation(_))
    }
}
