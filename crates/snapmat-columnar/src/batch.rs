//! Columnar row accumulation and Arrow batch building.

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::record_batch::RecordBatch;
use sha2::{Digest, Sha256};
use snapmat_common::ColumnType;
use std::sync::Arc;

use crate::error::{ColumnarError, Result};
use crate::row::{Row, Value};
use crate::schema::ColumnSchema;

/// Values of one column, stored in their physical type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Text(Vec<String>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Double(Vec<f64>),
    Bool(Vec<bool>),
    /// Microseconds since the Unix epoch.
    Timestamp(Vec<i64>),
}

impl ColumnData {
    pub fn with_capacity(column_type: ColumnType, capacity: usize) -> Self {
        match column_type {
            ColumnType::Text => ColumnData::Text(Vec::with_capacity(capacity)),
            ColumnType::Int32 => ColumnData::Int32(Vec::with_capacity(capacity)),
            ColumnType::Int64 => ColumnData::Int64(Vec::with_capacity(capacity)),
            ColumnType::Double => ColumnData::Double(Vec::with_capacity(capacity)),
            ColumnType::Bool => ColumnData::Bool(Vec::with_capacity(capacity)),
            ColumnType::Timestamp => ColumnData::Timestamp(Vec::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Text(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a value already conformed to this column's type.
    fn push(&mut self, value: Value) {
        match (self, value) {
            (ColumnData::Text(v), Value::Text(s)) => v.push(s),
            (ColumnData::Int32(v), Value::Int32(i)) => v.push(i),
            (ColumnData::Int64(v), Value::Int64(i)) => v.push(i),
            (ColumnData::Double(v), Value::Double(d)) => v.push(d),
            (ColumnData::Bool(v), Value::Bool(b)) => v.push(b),
            (ColumnData::Timestamp(v), Value::Timestamp(ts)) => v.push(ts.timestamp_micros()),
            (_, value) => unreachable!(
                "conformed {} value pushed into a column of another type",
                value.type_name()
            ),
        }
    }

    fn append(&mut self, other: ColumnData) {
        match (self, other) {
            (ColumnData::Text(a), ColumnData::Text(mut b)) => a.append(&mut b),
            (ColumnData::Int32(a), ColumnData::Int32(mut b)) => a.append(&mut b),
            (ColumnData::Int64(a), ColumnData::Int64(mut b)) => a.append(&mut b),
            (ColumnData::Double(a), ColumnData::Double(mut b)) => a.append(&mut b),
            (ColumnData::Bool(a), ColumnData::Bool(mut b)) => a.append(&mut b),
            (ColumnData::Timestamp(a), ColumnData::Timestamp(mut b)) => a.append(&mut b),
            _ => unreachable!("accumulators built from one schema share column types"),
        }
    }

    /// Split off the first `n` values, leaving the rest in place.
    fn take_front(&mut self, n: usize) -> ColumnData {
        fn split<T>(v: &mut Vec<T>, n: usize) -> Vec<T> {
            let rest = v.split_off(n);
            std::mem::replace(v, rest)
        }
        match self {
            ColumnData::Text(v) => ColumnData::Text(split(v, n)),
            ColumnData::Int32(v) => ColumnData::Int32(split(v, n)),
            ColumnData::Int64(v) => ColumnData::Int64(split(v, n)),
            ColumnData::Double(v) => ColumnData::Double(split(v, n)),
            ColumnData::Bool(v) => ColumnData::Bool(split(v, n)),
            ColumnData::Timestamp(v) => ColumnData::Timestamp(split(v, n)),
        }
    }

    fn into_array(self) -> ArrayRef {
        match self {
            ColumnData::Text(v) => Arc::new(StringArray::from(v)),
            ColumnData::Int32(v) => Arc::new(Int32Array::from(v)),
            ColumnData::Int64(v) => Arc::new(Int64Array::from(v)),
            ColumnData::Double(v) => Arc::new(Float64Array::from(v)),
            ColumnData::Bool(v) => Arc::new(BooleanArray::from(v)),
            ColumnData::Timestamp(v) => {
                Arc::new(TimestampMicrosecondArray::from(v).with_timezone("UTC"))
            }
        }
    }
}

/// Derived per-row columns kept alongside the data columns.
#[derive(Debug, Clone, Default, PartialEq)]
struct DerivedColumns {
    row_hash: Vec<i64>,
    is_complete: Vec<bool>,
}

/// Ordered, schema-conformed rows held as per-column vectors.
#[derive(Debug, Clone)]
pub struct ColumnAccumulator {
    schema: Arc<ColumnSchema>,
    columns: Vec<ColumnData>,
    derived: Option<DerivedColumns>,
    rows: usize,
}

impl ColumnAccumulator {
    pub fn new(schema: Arc<ColumnSchema>, derived: bool) -> Self {
        Self::with_capacity(schema, derived, 0)
    }

    pub fn with_capacity(schema: Arc<ColumnSchema>, derived: bool, capacity: usize) -> Self {
        let columns = schema
            .columns()
            .iter()
            .map(|c| ColumnData::with_capacity(c.column_type, capacity))
            .collect();
        Self {
            schema,
            columns,
            derived: derived.then(DerivedColumns::default),
            rows: 0,
        }
    }

    /// Conform a whole batch. Either every row is accepted or none is.
    pub fn from_rows(schema: Arc<ColumnSchema>, derived: bool, rows: &[Row]) -> Result<Self> {
        let mut acc = Self::with_capacity(schema, derived, rows.len());
        for row in rows {
            acc.push_row(row)?;
        }
        Ok(acc)
    }

    fn push_row(&mut self, row: &Row) -> Result<()> {
        let (values, complete) = self.schema.conform(row)?;
        if let Some(derived) = self.derived.as_mut() {
            derived.row_hash.push(row_hash(&values));
            derived.is_complete.push(complete);
        }
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value);
        }
        self.rows += 1;
        Ok(())
    }

    pub fn schema(&self) -> &Arc<ColumnSchema> {
        &self.schema
    }

    pub fn has_derived(&self) -> bool {
        self.derived.is_some()
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Move all rows of `other` to the end of `self`.
    pub fn append(&mut self, other: ColumnAccumulator) -> Result<()> {
        if *other.schema != *self.schema || other.has_derived() != self.has_derived() {
            return Err(ColumnarError::PreconditionViolation(
                "cannot merge accumulators built for different schemas".to_string(),
            ));
        }
        for (mine, theirs) in self.columns.iter_mut().zip(other.columns) {
            mine.append(theirs);
        }
        if let (Some(mine), Some(mut theirs)) = (self.derived.as_mut(), other.derived) {
            mine.row_hash.append(&mut theirs.row_hash);
            mine.is_complete.append(&mut theirs.is_complete);
        }
        self.rows += other.rows;
        Ok(())
    }

    /// Split off the first `n` rows (clamped to `len()`).
    pub fn take_front(&mut self, n: usize) -> ColumnAccumulator {
        let n = n.min(self.rows);
        let columns = self.columns.iter_mut().map(|c| c.take_front(n)).collect();
        let derived = self.derived.as_mut().map(|d| {
            let rest_hash = d.row_hash.split_off(n);
            let rest_complete = d.is_complete.split_off(n);
            DerivedColumns {
                row_hash: std::mem::replace(&mut d.row_hash, rest_hash),
                is_complete: std::mem::replace(&mut d.is_complete, rest_complete),
            }
        });
        self.rows -= n;
        ColumnAccumulator {
            schema: Arc::clone(&self.schema),
            columns,
            derived,
            rows: n,
        }
    }

    /// Take every row, leaving the accumulator empty.
    pub fn take_all(&mut self) -> ColumnAccumulator {
        self.take_front(self.rows)
    }

    /// Convert into an Arrow batch matching `schema().to_arrow(has_derived())`.
    pub fn into_record_batch(self) -> Result<RecordBatch> {
        let arrow_schema = self.schema.to_arrow(self.derived.is_some());
        let mut arrays: Vec<ArrayRef> = self
            .columns
            .into_iter()
            .map(ColumnData::into_array)
            .collect();
        if let Some(derived) = self.derived {
            arrays.push(Arc::new(Int64Array::from(derived.row_hash)));
            arrays.push(Arc::new(BooleanArray::from(derived.is_complete)));
        }
        Ok(RecordBatch::try_new(arrow_schema, arrays)?)
    }
}

/// First 8 bytes of SHA-256 over a canonical encoding of the row's values.
pub fn row_hash(values: &[Value]) -> i64 {
    let mut hasher = Sha256::new();
    for value in values {
        match value {
            Value::Null => hasher.update([0u8]),
            Value::Text(s) => {
                hasher.update([1u8]);
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Value::Int32(i) => {
                hasher.update([2u8]);
                hasher.update(i.to_le_bytes());
            }
            Value::Int64(i) => {
                hasher.update([3u8]);
                hasher.update(i.to_le_bytes());
            }
            Value::Double(d) => {
                hasher.update([4u8]);
                hasher.update(d.to_bits().to_le_bytes());
            }
            Value::Bool(b) => hasher.update([5u8, u8::from(*b)]),
            Value::Timestamp(ts) => {
                hasher.update([6u8]);
                hasher.update(ts.timestamp_micros().to_le_bytes());
            }
        }
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}
