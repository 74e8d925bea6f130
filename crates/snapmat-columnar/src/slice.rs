//! Slice-based append writer.
//!
//! Each [`SliceWriter::write_batch`] call persists its rows as one new row
//! group of the shared snapshot file, under an exclusive lock keyed on the
//! file's canonical path. Every writer in the process that targets the same
//! file takes the same lock. Share a writer among slice producers with an
//! `Arc`.
//!
//! A Parquet footer cannot be extended in place, so an append rebuilds the
//! file: committed row groups are streamed one at a time into a temporary
//! sibling, the new row group is added, and the result is renamed over the
//! target. A failed append leaves the previous `k` row groups readable.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, warn};

use crate::batch::ColumnAccumulator;
use crate::error::{ColumnarError, Result};
use crate::row::Row;
use crate::schema::ColumnSchema;
use crate::sink::{OpenMode, ParquetSink, WriterConfig};

/// Result of one committed slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceCommit {
    /// Zero-based index of the row group this slice became.
    pub row_group_index: usize,
    pub rows: usize,
    /// Row groups in the file after this commit.
    pub total_row_groups: usize,
}

type FileLocks = Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

static FILE_LOCKS: OnceLock<FileLocks> = OnceLock::new();

/// The write lock for one snapshot file, shared process-wide.
///
/// The parent directory must already exist so both spellings of a path
/// resolve to the same key.
fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let key = match (fs::canonicalize(dir), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    };
    let mut locks = FILE_LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(key).or_default())
}

#[derive(Debug, Default)]
struct SliceState {
    schema: Option<Arc<ColumnSchema>>,
    commits: u64,
}

/// Appends one row group per call to a shared file.
pub struct SliceWriter {
    path: PathBuf,
    config: WriterConfig,
    derived: bool,
    state: Mutex<SliceState>,
}

impl SliceWriter {
    /// Create a writer. With `schema = None` the schema is inferred from the
    /// first non-empty slice; an existing file must then match it.
    pub fn new(path: &Path, schema: Option<Arc<ColumnSchema>>, config: WriterConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            config,
            derived: false,
            state: Mutex::new(SliceState {
                schema,
                commits: 0,
            }),
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

    /// Slices committed through this writer.
    pub fn commits(&self) -> Result<u64> {
        self.state
            .lock()
            .map(|s| s.commits)
            .map_err(|_| ColumnarError::LockPoisoned("slice writer"))
    }

    /// Persist `rows` as one new row group.
    ///
    /// Returns `None` for an empty slice, which leaves the file untouched.
    pub fn write_batch(&self, rows: &[Row]) -> Result<Option<SliceCommit>> {
        if rows.is_empty() {
            return Ok(None);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ColumnarError::io(parent, e))?;
        }
        // Held across read, copy and rename. A panic mid-append cannot leave
        // a torn file behind, so a poisoned lock is still usable.
        let lock = file_lock(&self.path);
        let _file_guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self
            .state
            .lock()
            .map_err(|_| ColumnarError::LockPoisoned("slice writer"))?;

        let schema = match &state.schema {
            Some(schema) => Arc::clone(schema),
            None => Arc::new(ColumnSchema::infer(rows)?),
        };
        let chunk = ColumnAccumulator::from_rows(Arc::clone(&schema), self.derived, rows)?;
        let slice_rows = chunk.len();
        let batch = chunk.into_record_batch()?;

        let mode = if self.path.exists() {
            OpenMode::Append
        } else {
            OpenMode::Create
        };
        let tag = format!("{}-slice{}", self.config.temp_tag, state.commits);
        let mut sink = ParquetSink::open(
            &self.path,
            mode,
            schema.to_arrow(self.derived),
            self.config.compression,
            &tag,
        )?;

        if let Err(e) = sink.write_row_group(&batch) {
            warn!(path = %self.path.display(), error = %e, "slice write failed");
            sink.discard();
            return Err(e);
        }
        let summary = sink.commit()?;

        state.schema.get_or_insert(schema);
        state.commits += 1;
        debug!(
            path = %self.path.display(),
            ?mode,
            rows = slice_rows,
            row_groups = summary.row_groups,
            "slice committed"
        );

        Ok(Some(SliceCommit {
            row_group_index: summary.row_groups - 1,
            rows: slice_rows,
            total_row_groups: summary.row_groups,
        }))
    }
}
