//! Thread-safe row accumulation with a single terminal write pass.
//!
//! Producers call [`ConcurrentCollector::write_batch`] from any number of
//! threads. Each call conforms its rows into a private columnar chunk without
//! holding any lock, then appends the chunk to one of several sharded
//! accumulators. Only the shard append happens under a mutex, and rows of one
//! batch always stay together and in order.
//!
//! The physical write happens once, in [`ConcurrentCollector::complete`],
//! which materializes everything into exactly one row group.
//!
//! # Lifecycle
//!
//! ```text
//! open ──write_batch*──▶ seal() ──▶ complete()
//! ```
//!
//! `seal()` closes the collector for writes and fails while any
//! `write_batch` call is still in flight. `complete()` refuses to run on an
//! unsealed collector; `complete_shared()` additionally refuses while other
//! handles to the collector are alive.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use crate::batch::ColumnAccumulator;
use crate::error::{ColumnarError, Result};
use crate::row::Row;
use crate::schema::ColumnSchema;
use crate::sink::{OpenMode, ParquetSink, WriteSummary, WriterConfig};

/// Default shard count; bounded contention without many tiny chunks.
pub const DEFAULT_SHARDS: usize = 8;

/// Decrements the in-flight counter when a `write_batch` call returns.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Concurrent many-producer accumulator for one snapshot file.
pub struct ConcurrentCollector {
    path: PathBuf,
    config: WriterConfig,
    derived: bool,
    schema: OnceLock<Arc<ColumnSchema>>,
    shards: Vec<Mutex<Option<ColumnAccumulator>>>,
    next_shard: AtomicUsize,
    in_flight: AtomicUsize,
    sealed: AtomicBool,
    rows: AtomicU64,
}

impl ConcurrentCollector {
    /// Create a collector. With `schema = None` the schema is established by
    /// whichever producer's batch arrives first.
    pub fn new(path: &Path, schema: Option<Arc<ColumnSchema>>, config: WriterConfig) -> Self {
        let established = OnceLock::new();
        if let Some(schema) = schema {
            let _ = established.set(schema);
        }
        Self {
            path: path.to_path_buf(),
            config,
            derived: false,
            schema: established,
            shards: (0..DEFAULT_SHARDS).map(|_| Mutex::new(None)).collect(),
            next_shard: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            rows: AtomicU64::new(0),
        }
    }

    /// Append the `_row_hash` / `_is_complete` derived columns (off by default).
    pub fn with_derived_columns(mut self, enabled: bool) -> Self {
        self.derived = enabled;
        self
    }

    /// Override the shard count (at least 1).
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = (0..shards.max(1)).map(|_| Mutex::new(None)).collect();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> Option<&Arc<ColumnSchema>> {
        self.schema.get()
    }

    /// Rows accepted so far.
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::SeqCst)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    fn establish_schema(&self, rows: &[Row]) -> Result<Arc<ColumnSchema>> {
        if let Some(schema) = self.schema.get() {
            return Ok(Arc::clone(schema));
        }
        let inferred = Arc::new(ColumnSchema::infer(rows)?);
        // Losing the race is fine: the winner's schema governs this batch too.
        let _ = self.schema.set(inferred);
        self.schema
            .get()
            .cloned()
            .ok_or_else(|| ColumnarError::PreconditionViolation("schema not established".into()))
    }

    /// Accumulate a batch. Safe to call concurrently from many threads.
    ///
    /// Fails with `PreconditionViolation` once the collector is sealed.
    pub fn write_batch(&self, rows: &[Row]) -> Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight);
        if self.sealed.load(Ordering::SeqCst) {
            return Err(ColumnarError::PreconditionViolation(
                "write_batch called on a sealed collector".to_string(),
            ));
        }
        if rows.is_empty() {
            return Ok(());
        }

        let schema = self.establish_schema(rows)?;
        let chunk = ColumnAccumulator::from_rows(schema, self.derived, rows)?;
        let count = chunk.len() as u64;

        let idx = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        {
            let mut shard = self.shards[idx]
                .lock()
                .map_err(|_| ColumnarError::LockPoisoned("collector shard"))?;
            match shard.as_mut() {
                Some(acc) => acc.append(chunk)?,
                None => *shard = Some(chunk),
            }
        }
        self.rows.fetch_add(count, Ordering::SeqCst);
        Ok(())
    }

    /// Close the collector for writes.
    ///
    /// Fails, leaving the collector open, if a producer is mid-`write_batch`.
    /// Sealing twice is harmless.
    pub fn seal(&self) -> Result<()> {
        if self.sealed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let active = self.in_flight.load(Ordering::SeqCst);
        if active > 0 {
            self.sealed.store(false, Ordering::SeqCst);
            return Err(ColumnarError::PreconditionViolation(format!(
                "cannot seal collector: {active} producer(s) still writing"
            )));
        }
        debug!(path = %self.path.display(), rows = self.rows(), "collector sealed");
        Ok(())
    }

    /// Complete through a shared handle.
    ///
    /// Fails if any other handle is still alive, i.e. producers that were
    /// given a clone have not been joined.
    pub fn complete_shared(this: Arc<Self>) -> Result<Option<WriteSummary>> {
        match Arc::try_unwrap(this) {
            Ok(collector) => collector.complete(),
            Err(shared) => Err(ColumnarError::PreconditionViolation(format!(
                "cannot complete collector: {} other handle(s) still alive",
                Arc::strong_count(&shared) - 1
            ))),
        }
    }

    /// Materialize every accumulated row into one row group and publish.
    ///
    /// Requires a prior successful [`seal`](Self::seal). Returns `None`
    /// without touching the filesystem when no rows were collected.
    pub fn complete(self) -> Result<Option<WriteSummary>> {
        if !self.is_sealed() {
            return Err(ColumnarError::PreconditionViolation(
                "complete called before seal".to_string(),
            ));
        }

        let mut merged: Option<ColumnAccumulator> = None;
        for shard in self.shards {
            let chunk = shard
                .into_inner()
                .map_err(|_| ColumnarError::LockPoisoned("collector shard"))?;
            match (merged.as_mut(), chunk) {
                (Some(acc), Some(chunk)) => acc.append(chunk)?,
                (None, Some(chunk)) => merged = Some(chunk),
                (_, None) => {}
            }
        }

        let Some(all) = merged.filter(|acc| !acc.is_empty()) else {
            debug!(path = %self.path.display(), "no rows collected, snapshot left untouched");
            return Ok(None);
        };

        debug!(path = %self.path.display(), rows = all.len(), "collector materialized");
        let mut sink = ParquetSink::open(
            &self.path,
            OpenMode::Create,
            all.schema().to_arrow(all.has_derived()),
            self.config.compression,
            &self.config.temp_tag,
        )?;
        let batch = all.into_record_batch()?;
        sink.write_row_group(&batch)?;
        sink.commit().map(Some)
    }
}
