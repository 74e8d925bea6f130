//! Bounded-memory streaming writer for single-threaded row streams.
//!
//! Rows are buffered in memory and flushed as one row group each time the
//! buffer holds `row_group_size` rows, so memory stays O(row_group_size)
//! regardless of stream length. The file is opened lazily on the first
//! flush; a writer that never sees a row creates no file at all.
//!
//! # Thread Safety
//!
//! `BufferedWriter` is NOT thread-safe. Use from a single thread, or use
//! [`crate::ConcurrentCollector`] for many producers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::batch::ColumnAccumulator;
use crate::error::Result;
use crate::row::Row;
use crate::schema::ColumnSchema;
use crate::sink::{OpenMode, ParquetSink, WriteSummary, WriterConfig};

/// Streaming writer that emits fixed-size row groups.
pub struct BufferedWriter {
    path: PathBuf,
    config: WriterConfig,
    derived: bool,
    schema: Option<Arc<ColumnSchema>>,
    pending: Option<ColumnAccumulator>,
    sink: Option<ParquetSink>,
}

impl BufferedWriter {
    /// Create a writer. With `schema = None` the schema is inferred from the
    /// first non-empty batch.
    pub fn new(path: &Path, schema: Option<Arc<ColumnSchema>>, config: WriterConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            config,
            derived: false,
            schema,
            pending: None,
            sink: None,
        }
    }

    /// Append the `_row_hash` / `_is_complete` derived columns.
    pub fn with_derived_columns(mut self, enabled: bool) -> Self {
        self.derived = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The run's schema, once established.
    pub fn schema(&self) -> Option<&Arc<ColumnSchema>> {
        self.schema.as_ref()
    }

    /// Rows buffered but not yet flushed.
    pub fn pending_rows(&self) -> usize {
        self.pending.as_ref().map_or(0, ColumnAccumulator::len)
    }

    /// Rows already flushed into row groups.
    pub fn flushed_rows(&self) -> u64 {
        self.sink.as_ref().map_or(0, ParquetSink::rows)
    }

    /// Append rows, flushing a row group each time the threshold is reached.
    ///
    /// The batch is conformed as a whole before any of it is buffered.
    pub fn write_batch(&mut self, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let schema = match &self.schema {
            Some(schema) => Arc::clone(schema),
            None => {
                let inferred = Arc::new(ColumnSchema::infer(rows)?);
                debug!(path = %self.path.display(), columns = inferred.len(), "schema inferred");
                self.schema = Some(Arc::clone(&inferred));
                inferred
            }
        };

        let chunk = ColumnAccumulator::from_rows(schema, self.derived, rows)?;
        match self.pending.as_mut() {
            Some(pending) => pending.append(chunk)?,
            None => self.pending = Some(chunk),
        }

        let threshold = self.config.row_group_size;
        while self.pending_rows() >= threshold {
            if let Some(pending) = self.pending.as_mut() {
                let group = pending.take_front(threshold);
                self.flush_group(group)?;
            }
        }
        Ok(())
    }

    fn flush_group(&mut self, group: ColumnAccumulator) -> Result<()> {
        if group.is_empty() {
            return Ok(());
        }
        if self.sink.is_none() {
            let schema = group.schema().to_arrow(group.has_derived());
            self.sink = Some(ParquetSink::open(
                &self.path,
                OpenMode::Create,
                schema,
                self.config.compression,
                &self.config.temp_tag,
            )?);
        }
        let rows = group.len();
        let batch = group.into_record_batch()?;
        if let Some(sink) = self.sink.as_mut() {
            sink.write_row_group(&batch)?;
            trace!(rows, row_groups = sink.row_groups(), "row group flushed");
        }
        Ok(())
    }

    /// Flush the remainder, finalize the file and publish it.
    ///
    /// Returns `None` when no row was ever written; no file is created.
    pub fn complete(mut self) -> Result<Option<WriteSummary>> {
        if let Some(pending) = self.pending.take() {
            self.flush_group(pending)?;
        }
        match self.sink.take() {
            Some(sink) => sink.commit().map(Some),
            None => {
                debug!(path = %self.path.display(), "no rows written, snapshot left untouched");
                Ok(None)
            }
        }
    }
}
