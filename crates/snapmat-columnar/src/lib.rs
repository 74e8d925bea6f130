//! Snapshot materializer columnar storage.
//!
//! This crate provides:
//! - A row/schema model with the null-to-empty absence policy
//! - Columnar accumulation into Arrow record batches
//! - A Parquet sink that publishes through temp file + rename
//! - Three write strategies: buffered streaming, concurrent collector,
//!   and slice-based append

pub mod batch;
pub mod buffered;
pub mod collector;
pub mod error;
pub mod row;
pub mod schema;
pub mod sink;
pub mod slice;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::{row_hash, ColumnAccumulator, ColumnData};
pub use buffered::BufferedWriter;
pub use collector::ConcurrentCollector;
pub use error::{ColumnarError, Result};
pub use row::{Row, RowMapper, Value};
pub use schema::{ColumnDef, ColumnSchema, IS_COMPLETE_COLUMN, ROW_HASH_COLUMN};
pub use sink::{OpenMode, ParquetSink, WriteSummary, WriterConfig, DEFAULT_ROW_GROUP_SIZE};
pub use slice::{SliceCommit, SliceWriter};

/// Re-exported so callers can pick a codec without depending on `parquet`.
pub use parquet::basic::Compression;
