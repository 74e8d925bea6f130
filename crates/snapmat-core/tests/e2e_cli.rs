//! CLI E2E tests for the `snapmat` binary.
//!
//! Validates:
//! - `config show` reports the resolved config and where it came from
//! - `run` writes a readable snapshot and reports the run as JSON
//! - Null source values arrive as empty strings in the file
//! - Invalid config exits 10, failed rebuilds exit 1

use arrow::array::Array;
use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use predicates::prelude::*;
use serde_json::Value;
use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

// ============================================================================
// Helpers
// ============================================================================

/// Command for the snapmat binary, isolated from the user's config.
fn snapmat(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("snapmat");
    cmd.timeout(Duration::from_secs(60))
        .env_remove("SNAPMAT_CONFIG")
        .env_remove("RUST_LOG")
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"));
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("snapmat.toml");
    fs::write(&path, body).expect("write config");
    path
}

fn people_config(dir: &Path, strategy: &str) -> std::path::PathBuf {
    let output = dir.join("people.parquet");
    write_config(
        dir,
        &format!(
            r#"
output_path = "{}"
strategy = "{strategy}"
row_group_size = 2
compression = "snappy"
derive_columns = false

[[schema]]
name = "id"
type = "text"

[[schema]]
name = "name"
type = "text"
"#,
            output.display()
        ),
    )
}

fn write_people(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("people.jsonl");
    fs::write(
        &path,
        "{\"id\":\"1\",\"name\":\"A\"}\n{\"id\":\"2\",\"name\":null}\n{\"id\":\"3\",\"name\":\"C\"}\n",
    )
    .expect("write source");
    path
}

fn read_text_column(path: &Path, name: &str) -> (Vec<usize>, Vec<String>) {
    let file = File::open(path).expect("open snapshot");
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).expect("reader");
    let groups = builder
        .metadata()
        .row_groups()
        .iter()
        .map(|rg| rg.num_rows() as usize)
        .collect();
    let mut values = Vec::new();
    for batch in builder.build().expect("build") {
        let batch = batch.expect("batch");
        let idx = batch.schema().index_of(name).expect("column");
        let array = batch
            .column(idx)
            .as_any()
            .downcast_ref::<arrow::array::StringArray>()
            .expect("utf8");
        values.extend((0..array.len()).map(|i| array.value(i).to_string()));
    }
    (groups, values)
}

// ============================================================================
// config show
// ============================================================================

#[test]
fn test_config_show_defaults() {
    let home = tempdir().unwrap();
    let output = snapmat(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("parse JSON");
    assert_eq!(json["source"], "defaults");
    assert_eq!(json["config"]["strategy"], "buffered");
    assert_eq!(json["config"]["row_group_size"], 1000);
}

#[test]
fn test_config_show_from_cli_path() {
    let home = tempdir().unwrap();
    let config = people_config(home.path(), "slice");
    let output = snapmat(&home)
        .args(["config", "show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("parse JSON");
    assert!(json["source"].as_str().unwrap().starts_with("cli:"));
    assert_eq!(json["config"]["strategy"], "slice");
    assert_eq!(json["config"]["schema"][1]["type"], "text");
}

#[test]
fn test_config_from_env_var() {
    let home = tempdir().unwrap();
    let config = people_config(home.path(), "concurrent");
    let output = snapmat(&home)
        .env("SNAPMAT_CONFIG", &config)
        .args(["config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("parse JSON");
    assert!(json["source"].as_str().unwrap().starts_with("env:"));
    assert_eq!(json["config"]["strategy"], "concurrent");
}

#[test]
fn test_invalid_config_exits_10() {
    let home = tempdir().unwrap();
    let config = write_config(home.path(), "row_group_size = 0\n");
    snapmat(&home)
        .args(["config", "show", "--config"])
        .arg(&config)
        .assert()
        .code(10)
        .stderr(predicate::str::contains("row_group_size"));
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_buffered_null_becomes_empty_string() {
    let home = tempdir().unwrap();
    let config = people_config(home.path(), "buffered");
    let source = write_people(home.path());

    let output = snapmat(&home)
        .args(["run", "--tag", "nightly", "--config"])
        .arg(&config)
        .arg("--source")
        .arg(&source)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: Value = serde_json::from_slice(&output).expect("parse JSON");
    assert_eq!(json["outcome"], "started_immediately");
    assert_eq!(json["stats"]["completed"], 1);
    assert_eq!(json["summary"]["source_tag"], "nightly");
    assert_eq!(json["summary"]["rows"], 3);

    let snapshot = home.path().join("people.parquet");
    let (groups, ids) = read_text_column(&snapshot, "id");
    let (_, names) = read_text_column(&snapshot, "name");
    assert_eq!(groups, vec![2, 1]);
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(names, vec!["A", "", "C"]);
}

#[test]
fn test_run_slice_appends_across_invocations() {
    let home = tempdir().unwrap();
    let config = people_config(home.path(), "slice");
    let source = write_people(home.path());

    for _ in 0..2 {
        snapmat(&home)
            .args(["run", "--config"])
            .arg(&config)
            .arg("--source")
            .arg(&source)
            .assert()
            .success();
    }

    let (groups, ids) = read_text_column(&home.path().join("people.parquet"), "id");
    assert_eq!(groups, vec![2, 1, 2, 1]);
    assert_eq!(ids, vec!["1", "2", "3", "1", "2", "3"]);
}

#[test]
fn test_run_output_override() {
    let home = tempdir().unwrap();
    let config = people_config(home.path(), "concurrent");
    let source = write_people(home.path());
    let target = home.path().join("elsewhere").join("snap.parquet");

    snapmat(&home)
        .args(["run", "--config"])
        .arg(&config)
        .arg("--source")
        .arg(&source)
        .arg("--output")
        .arg(&target)
        .assert()
        .success();

    let (groups, mut ids) = read_text_column(&target, "id");
    ids.sort();
    assert_eq!(groups, vec![3]);
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert!(!home.path().join("people.parquet").exists());
}

#[test]
fn test_run_missing_source_exits_1() {
    let home = tempdir().unwrap();
    let config = people_config(home.path(), "buffered");
    let output = snapmat(&home)
        .args(["run", "--config"])
        .arg(&config)
        .args(["--source", "/no/such/rows.jsonl"])
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("parse JSON");
    assert_eq!(json["stats"]["failed"], 1);
    assert!(json["summary"].is_null());
    assert!(!home.path().join("people.parquet").exists());
}

#[test]
fn test_run_requires_source() {
    let home = tempdir().unwrap();
    snapmat(&home)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--source"));
}
