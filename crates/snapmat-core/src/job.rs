//! Rebuild job: pull rows from a source and route them into a writer.
//!
//! One [`SnapshotJob`] is built from a validated [`MaterializerConfig`] and a
//! [`SourceFactory`]. Each run opens a fresh source, writes through the
//! configured strategy, and reports a [`RunSummary`].

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use snapmat_columnar::{
    BufferedWriter, ColumnDef, ColumnSchema, ColumnarError, Compression, ConcurrentCollector, Row,
    SliceWriter, WriteSummary, WriterConfig,
};
use snapmat_common::{Error, Result, RunId, SnapshotRequest};
use snapmat_config::{CompressionKind, MaterializerConfig, WriteStrategyKind};
use tracing::{debug, info};

use crate::scheduler::Rebuild;
use crate::source::{RowSource, SourceFactory};

/// Outcome of one successful rebuild run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub source_tag: String,
    /// Rows written by this run.
    pub rows: u64,
    /// Row groups written by this run.
    pub row_groups: usize,
    /// Snapshot path, `None` when the source produced no rows.
    pub path: Option<PathBuf>,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Map the configured codec onto the Parquet one.
pub fn compression_for(kind: CompressionKind) -> Compression {
    match kind {
        CompressionKind::None => Compression::UNCOMPRESSED,
        CompressionKind::Snappy => Compression::SNAPPY,
        CompressionKind::Zstd => Compression::ZSTD(Default::default()),
    }
}

/// Build the explicit schema declared in config, if any.
pub fn schema_from_config(config: &MaterializerConfig) -> Result<Option<Arc<ColumnSchema>>> {
    let Some(specs) = &config.schema else {
        return Ok(None);
    };
    let defs = specs
        .iter()
        .map(|spec| ColumnDef::new(spec.name.clone(), spec.column_type))
        .collect();
    let schema = ColumnSchema::new(defs).map_err(Error::from)?;
    Ok(Some(Arc::new(schema)))
}

/// Emits one progress line each time another `every` rows have passed.
struct Progress<'a> {
    run_id: &'a RunId,
    source_tag: &'a str,
    every: u64,
    rows: u64,
    started: Instant,
}

impl<'a> Progress<'a> {
    fn new(run_id: &'a RunId, source_tag: &'a str, every: u64) -> Self {
        Self {
            run_id,
            source_tag,
            every: every.max(1),
            rows: 0,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, rows: usize) {
        let before = self.rows / self.every;
        self.rows += rows as u64;
        if self.rows / self.every > before {
            info!(
                run_id = %self.run_id,
                source_tag = self.source_tag,
                rows = self.rows,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "rebuild progress"
            );
        }
    }
}

/// What a strategy reports back to [`SnapshotJob::run`].
struct Written {
    rows: u64,
    row_groups: usize,
    path: Option<PathBuf>,
}

impl From<Option<WriteSummary>> for Written {
    fn from(summary: Option<WriteSummary>) -> Self {
        match summary {
            Some(s) => Written {
                rows: s.rows,
                row_groups: s.row_groups,
                path: Some(s.path),
            },
            None => Written {
                rows: 0,
                row_groups: 0,
                path: None,
            },
        }
    }
}

/// The rebuild driven by the scheduler.
pub struct SnapshotJob {
    config: MaterializerConfig,
    schema: Option<Arc<ColumnSchema>>,
    factory: Box<dyn SourceFactory>,
    last_summary: Mutex<Option<RunSummary>>,
}

impl SnapshotJob {
    /// Build a job. The config is validated here so a bad config fails
    /// before any request is accepted.
    pub fn new(config: MaterializerConfig, factory: impl SourceFactory) -> Result<Self> {
        let validation = config.validate();
        if !validation.is_valid() {
            return Err(Error::Config(validation.summary()));
        }
        let schema = schema_from_config(&config)?;
        Ok(Self {
            config,
            schema,
            factory: Box::new(factory),
            last_summary: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    /// Summary of the most recent successful run.
    pub fn last_summary(&self) -> Option<RunSummary> {
        self.last_summary.lock().ok().and_then(|guard| guard.clone())
    }

    fn writer_config(&self, run_id: &RunId) -> WriterConfig {
        WriterConfig::new(run_id.to_string())
            .with_row_group_size(self.config.row_group_size)
            .with_compression(compression_for(self.config.compression))
    }

    /// Execute one rebuild for `request`.
    pub fn run(&self, request: &SnapshotRequest) -> Result<RunSummary> {
        let run_id = RunId::new();
        let started = Instant::now();
        info!(
            run_id = %run_id,
            source_tag = %request.source_tag,
            strategy = %self.config.strategy,
            source = %self.factory.describe(),
            path = %self.config.output_path.display(),
            "rebuild run starting"
        );

        let mut source = self.factory.open()?;
        let mut progress = Progress::new(&run_id, &request.source_tag, self.config.progress_every);
        let written = match self.config.strategy {
            WriteStrategyKind::Buffered => self.write_buffered(&run_id, &mut *source, &mut progress)?,
            WriteStrategyKind::Concurrent => {
                self.write_concurrent(&run_id, &mut *source, &mut progress)?
            }
            WriteStrategyKind::Slice => self.write_slices(&run_id, &mut *source, &mut progress)?,
        };

        let summary = RunSummary {
            run_id,
            source_tag: request.source_tag.clone(),
            rows: written.rows,
            row_groups: written.row_groups,
            path: written.path,
            elapsed: started.elapsed(),
            finished_at: Utc::now(),
        };
        if let Ok(mut last) = self.last_summary.lock() {
            *last = Some(summary.clone());
        }
        Ok(summary)
    }

    fn batch_size(&self) -> usize {
        self.config.row_group_size.max(1)
    }

    fn write_buffered(
        &self,
        run_id: &RunId,
        source: &mut dyn RowSource,
        progress: &mut Progress<'_>,
    ) -> Result<Written> {
        let mut writer = BufferedWriter::new(
            &self.config.output_path,
            self.schema.clone(),
            self.writer_config(run_id),
        )
        .with_derived_columns(self.config.derive_columns);

        while let Some(batch) = source.next_batch(self.batch_size())? {
            writer.write_batch(&batch)?;
            progress.advance(batch.len());
        }
        Ok(writer.complete()?.into())
    }

    fn write_concurrent(
        &self,
        run_id: &RunId,
        source: &mut dyn RowSource,
        progress: &mut Progress<'_>,
    ) -> Result<Written> {
        let producers = self.config.producers.max(1);

        // The schema comes from the run's first batch, settled here before
        // any producer can race for it.
        let first = source.next_batch(self.batch_size())?;
        let schema = match (&self.schema, &first) {
            (Some(schema), _) => Some(Arc::clone(schema)),
            (None, Some(batch)) if !batch.is_empty() => {
                Some(Arc::new(ColumnSchema::infer(batch)?))
            }
            _ => None,
        };
        let collector = ConcurrentCollector::new(
            &self.config.output_path,
            schema,
            self.writer_config(run_id),
        )
        .with_derived_columns(self.config.derive_columns);

        let (tx, rx) = mpsc::sync_channel::<Vec<Row>>(producers * 2);
        let rx = Arc::new(Mutex::new(rx));

        thread::scope(|scope| -> Result<()> {
            let collector = &collector;
            let handles: Vec<_> = (0..producers)
                .map(|_| {
                    // Each producer owns a receiver handle; once all have
                    // exited the channel closes and `send` stops blocking.
                    let rx = Arc::clone(&rx);
                    scope.spawn(move || -> std::result::Result<usize, ColumnarError> {
                        let mut batches = 0;
                        loop {
                            let next = match rx.lock() {
                                Ok(guard) => guard.recv(),
                                Err(_) => return Err(ColumnarError::LockPoisoned("batch channel")),
                            };
                            let Ok(batch) = next else {
                                return Ok(batches);
                            };
                            collector.write_batch(&batch)?;
                            batches += 1;
                        }
                    })
                })
                .collect();
            drop(rx);

            let mut pulled = Ok(());
            let mut pending = first;
            while let Some(batch) = pending.take() {
                let rows = batch.len();
                if tx.send(batch).is_err() {
                    break;
                }
                progress.advance(rows);
                match source.next_batch(self.batch_size()) {
                    Ok(next) => pending = next,
                    Err(e) => {
                        pulled = Err(e);
                        break;
                    }
                }
            }
            drop(tx);

            let mut first_error = None;
            for handle in handles {
                let outcome = match handle.join() {
                    Ok(Ok(batches)) => {
                        debug!(run_id = %run_id, batches, "producer finished");
                        continue;
                    }
                    Ok(Err(e)) => Error::from(e),
                    Err(_) => Error::WriteIo("producer thread panicked".to_string()),
                };
                first_error.get_or_insert(outcome);
            }
            pulled?;
            first_error.map_or(Ok(()), Err)
        })?;

        collector.seal()?;
        Ok(collector.complete()?.into())
    }

    fn write_slices(
        &self,
        run_id: &RunId,
        source: &mut dyn RowSource,
        progress: &mut Progress<'_>,
    ) -> Result<Written> {
        let writer = SliceWriter::new(
            &self.config.output_path,
            self.schema.clone(),
            self.writer_config(run_id),
        )
        .with_derived_columns(self.config.derive_columns);

        let mut written = Written {
            rows: 0,
            row_groups: 0,
            path: None,
        };
        while let Some(batch) = source.next_batch(self.batch_size())? {
            if let Some(commit) = writer.write_batch(&batch)? {
                debug!(
                    run_id = %run_id,
                    row_group_index = commit.row_group_index,
                    rows = commit.rows,
                    "slice appended"
                );
                written.rows += commit.rows as u64;
                written.row_groups += 1;
                written.path = Some(self.config.output_path.clone());
            }
            progress.advance(batch.len());
        }
        Ok(written)
    }
}

impl Rebuild for SnapshotJob {
    fn rebuild(&self, request: &SnapshotRequest) -> Result<RunSummary> {
        self.run(request)
    }
}
