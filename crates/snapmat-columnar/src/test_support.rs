//! Read-back helpers for unit tests.

use arrow::array::{Array, BooleanArray, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::Path;

pub(crate) struct Snapshot {
    pub row_group_rows: Vec<usize>,
    pub batches: Vec<RecordBatch>,
}

impl Snapshot {
    fn column<'a, T: Array + 'static>(&'a self, name: &str) -> Vec<&'a T> {
        self.batches
            .iter()
            .map(|b| {
                let idx = b.schema().index_of(name).expect("column present");
                b.column(idx)
                    .as_any()
                    .downcast_ref::<T>()
                    .expect("column type")
            })
            .collect()
    }

    pub fn int64_column(&self, name: &str) -> Vec<i64> {
        self.column::<Int64Array>(name)
            .into_iter()
            .flat_map(|a| a.values().iter().copied().collect::<Vec<_>>())
            .collect()
    }

    pub fn text_column(&self, name: &str) -> Vec<String> {
        self.column::<StringArray>(name)
            .into_iter()
            .flat_map(|a| (0..a.len()).map(|i| a.value(i).to_string()).collect::<Vec<_>>())
            .collect()
    }

    pub fn bool_column(&self, name: &str) -> Vec<bool> {
        self.column::<BooleanArray>(name)
            .into_iter()
            .flat_map(|a| (0..a.len()).map(|i| a.value(i)).collect::<Vec<_>>())
            .collect()
    }

    pub fn total_rows(&self) -> usize {
        self.row_group_rows.iter().sum()
    }
}

pub(crate) fn read_snapshot(path: &Path) -> Snapshot {
    let file = File::open(path).expect("open snapshot");
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).expect("parquet reader");
    let row_group_rows = builder
        .metadata()
        .row_groups()
        .iter()
        .map(|rg| rg.num_rows() as usize)
        .collect();
    let batches = builder
        .build()
        .expect("build reader")
        .collect::<Result<Vec<_>, _>>()
        .expect("read batches");
    Snapshot {
        row_group_rows,
        batches,
    }
}
