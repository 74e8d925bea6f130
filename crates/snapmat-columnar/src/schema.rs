//! Column schema: ordered, uniquely named, typed columns.
//!
//! A schema is fixed for the duration of one rebuild run. It is either
//! declared up front or inferred once from the first batch, and every later
//! row is conformed against it.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::{DateTime, Utc};
use snapmat_common::ColumnType;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ColumnarError, Result};
use crate::row::{Row, Value};

/// Derived column holding a 64-bit digest of each row.
pub const ROW_HASH_COLUMN: &str = "_row_hash";

/// Derived column that is false when any value was defaulted from null.
pub const IS_COMPLETE_COLUMN: &str = "_is_complete";

const RESERVED_COLUMNS: [&str; 2] = [ROW_HASH_COLUMN, IS_COMPLETE_COLUMN];

/// One named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered sequence of unique `(name, type)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: Vec<ColumnDef>,
}

impl ColumnSchema {
    /// Build a schema, rejecting empty, duplicate or reserved names.
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        if columns.is_empty() {
            return Err(ColumnarError::InvalidSchema(
                "schema must have at least one column".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if column.name.is_empty() {
                return Err(ColumnarError::InvalidSchema(
                    "column names must not be empty".to_string(),
                ));
            }
            if RESERVED_COLUMNS.contains(&column.name.as_str()) {
                return Err(ColumnarError::InvalidSchema(format!(
                    "column name '{}' is reserved",
                    column.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(ColumnarError::InvalidSchema(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Infer a schema from the first batch of a run.
    ///
    /// Column order is first-appearance order across the batch. Each type
    /// comes from the first non-empty value seen for that column; a column
    /// that is null/absent/empty in every row fails inference.
    pub fn infer(rows: &[Row]) -> Result<Self> {
        if rows.is_empty() {
            return Err(ColumnarError::EmptyBatch);
        }

        let mut order: Vec<(String, Option<ColumnType>)> = Vec::new();
        for row in rows {
            for (name, value) in row.iter() {
                let slot = match order.iter().position(|(n, _)| n == name) {
                    Some(idx) => idx,
                    None => {
                        order.push((name.to_string(), None));
                        order.len() - 1
                    }
                };
                if order[slot].1.is_none() && !value.is_empty() {
                    order[slot].1 = value.column_type();
                }
            }
        }

        // A column with only empty strings is still text.
        for (name, ty) in order.iter_mut() {
            if ty.is_none()
                && rows
                    .iter()
                    .any(|r| matches!(r.get(name), Some(Value::Text(_))))
            {
                *ty = Some(ColumnType::Text);
            }
        }

        let mut columns = Vec::with_capacity(order.len());
        for (name, ty) in order {
            match ty {
                Some(column_type) => columns.push(ColumnDef { name, column_type }),
                None => return Err(ColumnarError::SchemaInference { column: name }),
            }
        }
        Self::new(columns)
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Arrow schema for files written with this column set. All fields are
    /// non-nullable since absent values are written as canonical empties.
    pub fn to_arrow(&self, derived: bool) -> SchemaRef {
        let mut fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(c.name.as_str(), arrow_type(c.column_type), false))
            .collect();
        if derived {
            fields.push(Field::new(ROW_HASH_COLUMN, DataType::Int64, false));
            fields.push(Field::new(IS_COMPLETE_COLUMN, DataType::Boolean, false));
        }
        Arc::new(Schema::new(fields))
    }

    /// Conform one row to this schema.
    ///
    /// Returns the values in schema order with nulls replaced by canonical
    /// empties, plus whether every value was present. An empty string in a
    /// non-text column counts as absent.
    pub fn conform(&self, row: &Row) -> Result<(Vec<Value>, bool)> {
        for (name, value) in row.iter() {
            if self.index_of(name).is_none() {
                return Err(ColumnarError::SchemaMismatch {
                    column: name.to_string(),
                    expected: "a declared column".to_string(),
                    actual: format!("undeclared column of type {}", value.type_name()),
                });
            }
        }

        let mut complete = true;
        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = row.get(&column.name).cloned().unwrap_or(Value::Null);
            // Inference skips empty strings, so they read as absent in
            // non-text columns.
            let absent = value.is_null()
                || (column.column_type != ColumnType::Text && value.is_empty());
            if absent {
                complete = false;
                values.push(canonical_empty(column.column_type));
                continue;
            }
            values.push(coerce(column, value)?);
        }
        Ok((values, complete))
    }
}

/// Arrow physical type for a semantic column type.
pub fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Text => DataType::Utf8,
        ColumnType::Int32 => DataType::Int32,
        ColumnType::Int64 => DataType::Int64,
        ColumnType::Double => DataType::Float64,
        ColumnType::Bool => DataType::Boolean,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
    }
}

/// The value written in place of a null for each column type.
pub fn canonical_empty(column_type: ColumnType) -> Value {
    match column_type {
        ColumnType::Text => Value::Text(String::new()),
        ColumnType::Int32 => Value::Int32(0),
        ColumnType::Int64 => Value::Int64(0),
        ColumnType::Double => Value::Double(0.0),
        ColumnType::Bool => Value::Bool(false),
        ColumnType::Timestamp => Value::Timestamp(DateTime::<Utc>::UNIX_EPOCH),
    }
}

/// Accept exact matches and lossless widenings only.
fn coerce(column: &ColumnDef, value: Value) -> Result<Value> {
    let coerced = match (column.column_type, value) {
        (ColumnType::Text, v @ Value::Text(_)) => v,
        (ColumnType::Int32, v @ Value::Int32(_)) => v,
        (ColumnType::Int64, v @ Value::Int64(_)) => v,
        (ColumnType::Int64, Value::Int32(i)) => Value::Int64(i64::from(i)),
        (ColumnType::Double, v @ Value::Double(_)) => v,
        (ColumnType::Double, Value::Int32(i)) => Value::Double(f64::from(i)),
        (ColumnType::Double, Value::Int64(i)) => Value::Double(i as f64),
        (ColumnType::Bool, v @ Value::Bool(_)) => v,
        (ColumnType::Timestamp, v @ Value::Timestamp(_)) => v,
        (expected, actual) => {
            return Err(ColumnarError::SchemaMismatch {
                column: column.name.clone(),
                expected: expected.to_string(),
                actual: actual.type_name().to_string(),
            })
        }
    };
    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schema(cols: &[(&str, ColumnType)]) -> ColumnSchema {
        ColumnSchema::new(cols.iter().map(|(n, t)| ColumnDef::new(*n, *t)).collect()).unwrap()
    }

    #[test]
    fn test_new_rejects_duplicates_and_reserved() {
        let dup = ColumnSchema::new(vec![
            ColumnDef::new("a", ColumnType::Text),
            ColumnDef::new("a", ColumnType::Int64),
        ]);
        assert!(matches!(dup, Err(ColumnarError::InvalidSchema(_))));

        let reserved = ColumnSchema::new(vec![ColumnDef::new(ROW_HASH_COLUMN, ColumnType::Int64)]);
        assert!(matches!(reserved, Err(ColumnarError::InvalidSchema(_))));

        assert!(ColumnSchema::new(Vec::new()).is_err());
    }

    #[test]
    fn test_infer_uses_first_non_empty_value() {
        let rows = vec![
            Row::new().with("id", "1").with("score", Value::Null),
            Row::new().with("id", "2").with("score", 0.5).with("ok", true),
        ];
        let inferred = ColumnSchema::infer(&rows).unwrap();
        assert_eq!(
            inferred,
            schema(&[
                ("id", ColumnType::Text),
                ("score", ColumnType::Double),
                ("ok", ColumnType::Bool)
            ])
        );
    }

    #[test]
    fn test_infer_fails_for_all_null_column() {
        let rows = vec![
            Row::new().with("id", "1").with("region", Value::Null),
            Row::new().with("id", "2"),
        ];
        match ColumnSchema::infer(&rows) {
            Err(ColumnarError::SchemaInference { column }) => assert_eq!(column, "region"),
            other => panic!("expected inference error, got {other:?}"),
        }
    }

    #[test]
    fn test_infer_all_empty_strings_is_text() {
        let rows = vec![Row::new().with("note", ""), Row::new().with("note", Value::Null)];
        let inferred = ColumnSchema::infer(&rows).unwrap();
        assert_eq!(inferred.columns()[0].column_type, ColumnType::Text);
    }

    #[test]
    fn test_infer_empty_batch() {
        assert!(matches!(
            ColumnSchema::infer(&[]),
            Err(ColumnarError::EmptyBatch)
        ));
    }

    #[test]
    fn test_conform_null_becomes_canonical_empty() {
        let s = schema(&[("id", ColumnType::Text), ("name", ColumnType::Text)]);
        let (values, complete) = s
            .conform(&Row::new().with("id", "2").with("name", Value::Null))
            .unwrap();
        assert_eq!(values, vec![Value::from("2"), Value::from("")]);
        assert!(!complete);
    }

    #[test]
    fn test_conform_absent_and_all_empties() {
        let s = schema(&[
            ("t", ColumnType::Text),
            ("i", ColumnType::Int32),
            ("l", ColumnType::Int64),
            ("d", ColumnType::Double),
            ("b", ColumnType::Bool),
            ("ts", ColumnType::Timestamp),
        ]);
        let (values, complete) = s.conform(&Row::new()).unwrap();
        assert!(!complete);
        assert_eq!(
            values,
            vec![
                Value::from(""),
                Value::Int32(0),
                Value::Int64(0),
                Value::Double(0.0),
                Value::Bool(false),
                Value::Timestamp(Utc.timestamp_opt(0, 0).unwrap()),
            ]
        );
    }

    #[test]
    fn test_conform_empty_string_in_typed_column_is_absent() {
        let s = schema(&[("x", ColumnType::Int64), ("note", ColumnType::Text)]);
        let (values, complete) = s
            .conform(&Row::new().with("x", "").with("note", ""))
            .unwrap();
        assert_eq!(values, vec![Value::Int64(0), Value::from("")]);
        assert!(!complete);

        let (_, complete) = s
            .conform(&Row::new().with("x", 1i64).with("note", ""))
            .unwrap();
        assert!(complete);
    }

    #[test]
    fn test_inferred_schema_accepts_its_own_batch() {
        let rows = vec![Row::new().with("x", ""), Row::new().with("x", 5i64)];
        let inferred = ColumnSchema::infer(&rows).unwrap();
        assert_eq!(inferred, schema(&[("x", ColumnType::Int64)]));
        for row in &rows {
            inferred.conform(row).unwrap();
        }
    }

    #[test]
    fn test_conform_widens_integers() {
        let s = schema(&[("l", ColumnType::Int64), ("d", ColumnType::Double)]);
        let (values, complete) = s
            .conform(&Row::new().with("l", 5i32).with("d", 7i64))
            .unwrap();
        assert_eq!(values, vec![Value::Int64(5), Value::Double(7.0)]);
        assert!(complete);
    }

    #[test]
    fn test_conform_rejects_type_mismatch() {
        let s = schema(&[("n", ColumnType::Int32)]);
        let err = s.conform(&Row::new().with("n", "seven")).unwrap_err();
        match err {
            ColumnarError::SchemaMismatch {
                column,
                expected,
                actual,
            } => {
                assert_eq!(column, "n");
                assert_eq!(expected, "int32");
                assert_eq!(actual, "text");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_conform_rejects_undeclared_column() {
        let s = schema(&[("id", ColumnType::Text)]);
        let err = s
            .conform(&Row::new().with("id", "1").with("extra", 1i64))
            .unwrap_err();
        assert!(matches!(err, ColumnarError::SchemaMismatch { column, .. } if column == "extra"));
    }

    #[test]
    fn test_to_arrow_appends_derived_columns() {
        let s = schema(&[("id", ColumnType::Text), ("at", ColumnType::Timestamp)]);
        let plain = s.to_arrow(false);
        assert_eq!(plain.fields().len(), 2);
        assert!(!plain.field(0).is_nullable());

        let derived = s.to_arrow(true);
        assert_eq!(derived.field(2).name(), ROW_HASH_COLUMN);
        assert_eq!(derived.field(3).name(), IS_COMPLETE_COLUMN);
        assert_eq!(
            derived.field(1).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        );
    }
}
