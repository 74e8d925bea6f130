//! Source-side row representation and typed extraction.
//!
//! A [`Row`] is an ordered name → [`Value`] mapping. Sources either build rows
//! directly or register one typed extractor per column on a [`RowMapper`],
//! which turns any record type into rows without runtime reflection.

use chrono::{DateTime, Utc};
use snapmat_common::ColumnType;
use std::sync::Arc;

use crate::error::Result;
use crate::schema::{ColumnDef, ColumnSchema};

/// A single source value. `Null` marks an absent value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Semantic type of this value, `None` for `Null`.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Text(_) => Some(ColumnType::Text),
            Value::Int32(_) => Some(ColumnType::Int32),
            Value::Int64(_) => Some(ColumnType::Int64),
            Value::Double(_) => Some(ColumnType::Double),
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Empty strings count as empty for schema inference.
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Name used in mismatch errors.
    pub(crate) fn type_name(&self) -> &'static str {
        self.column_type().map_or("null", |t| t.as_str())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Ordered mapping from column name to value.
///
/// Setting an existing name replaces its value in place, keeping the
/// original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

type Extractor<R> = Box<dyn Fn(&R) -> Value + Send + Sync>;

/// Maps records of type `R` to rows through per-column extractors
/// registered ahead of time.
///
/// ```
/// use snapmat_columnar::RowMapper;
///
/// struct User { id: u32, email: Option<String> }
///
/// let mapper = RowMapper::<User>::new()
///     .int64("id", |u| Some(u.id as i64))
///     .text("email", |u| u.email.clone());
/// let schema = mapper.schema().unwrap();
/// let row = mapper.map(&User { id: 7, email: None });
/// assert_eq!(schema.len(), 2);
/// assert!(row.get("email").unwrap().is_null());
/// ```
pub struct RowMapper<R> {
    columns: Vec<(ColumnDef, Extractor<R>)>,
}

impl<R> Default for RowMapper<R> {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
        }
    }
}

impl<R> RowMapper<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn register<T, F>(mut self, name: &str, column_type: ColumnType, f: F) -> Self
    where
        T: Into<Value>,
        F: Fn(&R) -> Option<T> + Send + Sync + 'static,
    {
        self.columns.push((
            ColumnDef::new(name, column_type),
            Box::new(move |record| f(record).map_or(Value::Null, Into::into)),
        ));
        self
    }

    pub fn text<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&R) -> Option<String> + Send + Sync + 'static,
    {
        self.register(name, ColumnType::Text, f)
    }

    pub fn int32<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&R) -> Option<i32> + Send + Sync + 'static,
    {
        self.register(name, ColumnType::Int32, f)
    }

    pub fn int64<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&R) -> Option<i64> + Send + Sync + 'static,
    {
        self.register(name, ColumnType::Int64, f)
    }

    pub fn double<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&R) -> Option<f64> + Send + Sync + 'static,
    {
        self.register(name, ColumnType::Double, f)
    }

    pub fn bool<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&R) -> Option<bool> + Send + Sync + 'static,
    {
        self.register(name, ColumnType::Bool, f)
    }

    pub fn timestamp<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&R) -> Option<DateTime<Utc>> + Send + Sync + 'static,
    {
        self.register(name, ColumnType::Timestamp, f)
    }

    /// The explicit schema implied by the registered extractors.
    pub fn schema(&self) -> Result<Arc<ColumnSchema>> {
        let defs = self.columns.iter().map(|(def, _)| def.clone()).collect();
        Ok(Arc::new(ColumnSchema::new(defs)?))
    }

    pub fn map(&self, record: &R) -> Row {
        let mut row = Row::with_capacity(self.columns.len());
        for (def, extract) in &self.columns {
            row.fields.push((def.name.clone(), extract(record)));
        }
        row
    }

    pub fn map_all<'a, I>(&self, records: I) -> Vec<Row>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        records.into_iter().map(|r| self.map(r)).collect()
    }
}
