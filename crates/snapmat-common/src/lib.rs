//! Snapshot materializer common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the snapmat crates:
//! - Snapshot requests and run identifiers
//! - Semantic column types
//! - Snapshot file format versioning
//! - The unified error type surfaced by rebuild runs

pub mod column;
pub mod error;
pub mod request;
pub mod schema;

pub use column::ColumnType;
pub use error::{Error, Result};
pub use request::{RunId, SnapshotRequest, QUEUED_REQUEST_TAG};
pub use schema::FORMAT_VERSION;
