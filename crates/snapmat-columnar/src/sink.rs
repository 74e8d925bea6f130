//! Parquet storage sink.
//!
//! Every write goes to a sibling temporary file first and is published onto
//! the canonical path with a rename, so readers of the canonical path only
//! ever see complete files. Each call to [`ParquetSink::write_row_group`]
//! produces exactly one independently compressed row group.
//!
//! Appending carries the committed row groups of the existing file over as
//! raw column chunks: their pages are copied byte for byte, never decoded.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ArrowReaderMetadata, ArrowReaderOptions};
use parquet::arrow::arrow_to_parquet_schema;
use parquet::arrow::arrow_writer::{compute_leaves, get_column_writers};
use parquet::basic::Compression;
use parquet::column::writer::ColumnCloseResult;
use parquet::file::properties::{WriterProperties, WriterPropertiesPtr};
use parquet::file::writer::SerializedFileWriter;
use parquet::format::KeyValue;
use parquet::schema::types::SchemaDescriptor;
use snapmat_common::schema::{check_appendable, FORMAT_VERSION_KEY};
use snapmat_common::FORMAT_VERSION;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ColumnarError, Result};

/// Default rows per row group.
pub const DEFAULT_ROW_GROUP_SIZE: usize = 1000;

/// How the sink treats an existing file at the canonical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Start a new file; publishing replaces any previous snapshot.
    Create,
    /// Carry every committed row group of the existing file forward.
    Append,
}

/// Writer configuration shared by all strategies.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Rows per row group for the buffered writer.
    pub row_group_size: usize,
    pub compression: Compression,
    /// Distinguishes temporary files of concurrent runs.
    pub temp_tag: String,
}

impl WriterConfig {
    pub fn new(temp_tag: impl Into<String>) -> Self {
        Self {
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            compression: Compression::ZSTD(Default::default()),
            temp_tag: temp_tag.into(),
        }
    }

    pub fn with_row_group_size(mut self, rows: usize) -> Self {
        self.row_group_size = rows.max(1);
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self::new("tmp")
    }
}

/// Outcome of a completed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub rows: u64,
    pub row_groups: usize,
}

/// Sibling temporary path: `<dir>/.<file name>.<tag>.tmp`.
pub fn temp_path(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{name}.{tag}.tmp"))
}

fn writer_properties(compression: Compression) -> WriterPropertiesPtr {
    Arc::new(
        WriterProperties::builder()
            .set_compression(compression)
            .set_key_value_metadata(Some(vec![KeyValue::new(
                FORMAT_VERSION_KEY.to_string(),
                FORMAT_VERSION.to_string(),
            )]))
            .build(),
    )
}

/// An open snapshot file being written through a temporary path.
pub struct ParquetSink {
    path: PathBuf,
    tmp_path: PathBuf,
    schema: SchemaRef,
    parquet_schema: SchemaDescriptor,
    props: WriterPropertiesPtr,
    writer: SerializedFileWriter<File>,
    rows: u64,
    row_groups: usize,
}

impl ParquetSink {
    /// Open the sink.
    ///
    /// In [`OpenMode::Append`] with an existing target, the existing file must
    /// carry the same columns and a compatible format version; its row groups
    /// are carried into the temporary file before returning. The existing
    /// file is opened once, so a concurrent replacement of the canonical
    /// path cannot change what is copied.
    pub fn open(
        path: &Path,
        mode: OpenMode,
        schema: SchemaRef,
        compression: Compression,
        temp_tag: &str,
    ) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ColumnarError::io(parent, e))?;
        }

        let existing = match mode {
            OpenMode::Append if path.exists() => Some(ExistingFile::open(path, &schema)?),
            _ => None,
        };

        let parquet_schema = arrow_to_parquet_schema(&schema)?;
        let props = writer_properties(compression);
        let tmp_path = temp_path(path, temp_tag);
        let file = File::create(&tmp_path).map_err(|e| ColumnarError::io(&tmp_path, e))?;
        let writer =
            SerializedFileWriter::new(file, parquet_schema.root_schema_ptr(), Arc::clone(&props))?;

        let mut sink = Self {
            path: path.to_path_buf(),
            tmp_path,
            schema,
            parquet_schema,
            props,
            writer,
            rows: 0,
            row_groups: 0,
        };

        if let Some(existing) = existing {
            if let Err(e) = sink.carry_row_groups(&existing) {
                sink.discard();
                return Err(e);
            }
        }

        debug!(
            path = %sink.path.display(),
            ?mode,
            carried_row_groups = sink.row_groups,
            "parquet sink opened"
        );
        Ok(sink)
    }

    /// Splice the committed row groups of `existing` into this sink.
    fn carry_row_groups(&mut self, existing: &ExistingFile) -> Result<()> {
        for row_group in existing.metadata.metadata().row_groups() {
            let rows = row_group.num_rows().max(0) as u64;
            let mut out = self.writer.next_row_group()?;
            for chunk in row_group.columns() {
                out.append_column(
                    &existing.file,
                    ColumnCloseResult {
                        bytes_written: chunk.compressed_size().max(0) as u64,
                        rows_written: rows,
                        metadata: chunk.clone(),
                        bloom_filter: None,
                        column_index: None,
                        offset_index: None,
                    },
                )?;
            }
            out.close()?;
            self.rows += rows;
            self.row_groups += 1;
        }
        Ok(())
    }

    /// Write one batch as exactly one row group. Empty batches are skipped.
    pub fn write_row_group(&mut self, batch: &RecordBatch) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let mut columns = get_column_writers(&self.parquet_schema, &self.props, &self.schema)?;
        for ((writer, field), array) in columns
            .iter_mut()
            .zip(self.schema.fields().iter())
            .zip(batch.columns())
        {
            for leaf in compute_leaves(field, array)? {
                writer.write(&leaf)?;
            }
        }

        let mut out = self.writer.next_row_group()?;
        for writer in columns {
            writer.close()?.append_to_row_group(&mut out)?;
        }
        out.close()?;
        self.rows += batch.num_rows() as u64;
        self.row_groups += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn row_groups(&self) -> usize {
        self.row_groups
    }

    pub fn temp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Write the footer, sync, and rename onto the canonical path.
    pub fn commit(self) -> Result<WriteSummary> {
        let file = self.writer.into_inner()?;
        file.sync_all()
            .map_err(|e| ColumnarError::io(&self.tmp_path, e))?;
        drop(file);
        fs::rename(&self.tmp_path, &self.path).map_err(|e| ColumnarError::io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            rows = self.rows,
            row_groups = self.row_groups,
            "snapshot published"
        );
        Ok(WriteSummary {
            path: self.path,
            rows: self.rows,
            row_groups: self.row_groups,
        })
    }

    /// Drop the writer and remove the temporary file.
    pub fn discard(self) {
        let tmp_path = self.tmp_path;
        drop(self.writer);
        if let Err(e) = fs::remove_file(&tmp_path) {
            debug!(path = %tmp_path.display(), error = %e, "failed to remove temporary file");
        }
    }
}

/// An existing snapshot held open for the whole append.
struct ExistingFile {
    file: File,
    metadata: ArrowReaderMetadata,
}

impl ExistingFile {
    fn open(path: &Path, expected: &SchemaRef) -> Result<Self> {
        let file = File::open(path).map_err(|e| ColumnarError::io(path, e))?;
        let metadata = ArrowReaderMetadata::load(&file, ArrowReaderOptions::new())?;

        let version = metadata
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|kvs| kvs.iter().find(|kv| kv.key == FORMAT_VERSION_KEY))
            .and_then(|kv| kv.value.as_deref());
        if let Err(e) = check_appendable(version) {
            return Err(ColumnarError::SchemaMismatch {
                column: "*".to_string(),
                expected: format!("format version {FORMAT_VERSION}"),
                actual: e.to_string(),
            });
        }

        let found = metadata.schema();
        let described = |s: &SchemaRef| {
            s.fields()
                .iter()
                .map(|f| format!("{}:{}", f.name(), f.data_type()))
                .collect::<Vec<_>>()
                .join(",")
        };
        let same_columns = found.fields().len() == expected.fields().len()
            && found
                .fields()
                .iter()
                .zip(expected.fields().iter())
                .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type());
        if !same_columns {
            return Err(ColumnarError::SchemaMismatch {
                column: "*".to_string(),
                expected: described(expected),
                actual: described(found),
            });
        }

        Ok(Self { file, metadata })
    }
}
