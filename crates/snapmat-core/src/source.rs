//! Upstream row sources.
//!
//! A rebuild pulls rows in batches from a [`RowSource`]. Each rebuild opens a
//! fresh source through a [`SourceFactory`], so a source never has to be
//! rewindable.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use snapmat_columnar::{Row, Value};
use snapmat_common::{Error, Result};

/// Pull-based batched delivery of rows.
pub trait RowSource {
    /// Return up to `max_rows` rows, or `None` once exhausted.
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>>;
}

/// Opens a fresh [`RowSource`] for each rebuild.
pub trait SourceFactory: Send + Sync + 'static {
    fn open(&self) -> Result<Box<dyn RowSource>>;

    /// Short description for log lines.
    fn describe(&self) -> String {
        "source".to_string()
    }
}

impl<F> SourceFactory for F
where
    F: Fn() -> Result<Box<dyn RowSource>> + Send + Sync + 'static,
{
    fn open(&self) -> Result<Box<dyn RowSource>> {
        self()
    }
}

/// In-memory rows, handed out in order.
#[derive(Debug, Default)]
pub struct VecSource {
    rows: std::vec::IntoIter<Row>,
}

impl VecSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowSource for VecSource {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>> {
        let batch: Vec<Row> = self.rows.by_ref().take(max_rows.max(1)).collect();
        Ok((!batch.is_empty()).then_some(batch))
    }
}

/// A file with one JSON object per line.
///
/// Blank lines are skipped. `null` becomes [`Value::Null`], integers
/// `Int64`, other numbers `Double`. Arrays and nested objects are kept as
/// their JSON text.
pub struct JsonLinesSource {
    path: PathBuf,
    reader: BufReader<File>,
    line_no: usize,
    buf: String,
}

impl JsonLinesSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Source(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            line_no: 0,
            buf: String::new(),
        })
    }

    fn parse_line(&self, line: &str) -> Result<Row> {
        let parsed: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            Error::Source(format!("{}:{}: {e}", self.path.display(), self.line_no))
        })?;
        let serde_json::Value::Object(map) = parsed else {
            return Err(Error::Source(format!(
                "{}:{}: expected a JSON object",
                self.path.display(),
                self.line_no
            )));
        };
        Ok(map
            .into_iter()
            .map(|(key, value)| (key, json_to_value(value)))
            .collect())
    }
}

fn json_to_value(value: serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => n.as_f64().map_or(Value::Null, Value::Double),
        },
        Json::String(s) => Value::Text(s),
        other => Value::Text(other.to_string()),
    }
}

impl RowSource for JsonLinesSource {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>> {
        let mut rows = Vec::with_capacity(max_rows.clamp(1, 4096));
        while rows.len() < max_rows.max(1) {
            self.buf.clear();
            let read = self.reader.read_line(&mut self.buf).map_err(|e| {
                Error::Source(format!("{}:{}: {e}", self.path.display(), self.line_no + 1))
            })?;
            if read == 0 {
                break;
            }
            self.line_no += 1;
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            let row = self.parse_line(line)?;
            rows.push(row);
        }
        Ok((!rows.is_empty()).then_some(rows))
    }
}

/// Opens a [`JsonLinesSource`] on the same path for every rebuild.
#[derive(Debug, Clone)]
pub struct JsonLinesFactory {
    path: PathBuf,
}

impl JsonLinesFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceFactory for JsonLinesFactory {
    fn open(&self) -> Result<Box<dyn RowSource>> {
        Ok(Box::new(JsonLinesSource::open(&self.path)?))
    }

    fn describe(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }
}
