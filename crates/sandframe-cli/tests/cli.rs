//! End-to-end tests for the sandframe CLI.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

const SALES: &str = r#"{"columns": [
  {"name": "region", "type": "text", "values": ["north", "south", "north", "east", null]},
  {"name": "units", "type": "numeric", "values": [3, 5, 2, 8, 1]}
]}"#;

/// A temporary directory holding a dataset file.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::write(dir.path().join("sales.json"), SALES).expect("Failed to write dataset");
        Self { dir }
    }

    fn data(&self) -> PathBuf {
        self.dir.path().join("sales.json")
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("Failed to write file");
        path
    }
}

fn sandframe() -> Command {
    Command::cargo_bin("sandframe").expect("Failed to find sandframe binary")
}

/// The worker binary cargo placed next to the CLI, if it has been built.
fn worker() -> Option<PathBuf> {
    let cli = assert_cmd::cargo::cargo_bin("sandframe");
    let worker = cli.with_file_name(format!("sandframe-worker{}", std::env::consts::EXE_SUFFIX));
    if worker.exists() {
        Some(worker)
    } else {
        eprintln!("skipping: sandframe-worker is not built");
        None
    }
}

// =============================================================================
// Summary
// =============================================================================

#[test]
fn test_summary_reports_shape() {
    let ws = Workspace::new();
    let output = sandframe()
        .arg("summary")
        .arg("--data")
        .arg(ws.data())
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["rows"], 5);
    assert_eq!(summary["columns"], 2);
    assert_eq!(summary["missing_values"], 1);
    assert_eq!(summary["numeric_columns"], serde_json::json!(["units"]));
    assert_eq!(summary["categorical_columns"], serde_json::json!(["region"]));
}

#[test]
fn test_summary_rejects_ragged_dataset() {
    let ws = Workspace::new();
    let bad = ws.write(
        "bad.json",
        r#"{"columns": [
          {"name": "a", "type": "numeric", "values": [1, 2]},
          {"name": "b", "type": "numeric", "values": [1]}
        ]}"#,
    );
    sandframe()
        .arg("summary")
        .arg("--data")
        .arg(bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_missing_dataset_names_the_file() {
    sandframe()
        .args(["summary", "--data", "/nonexistent/sales.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nonexistent/sales.json"));
}

// =============================================================================
// Argument handling
// =============================================================================

#[test]
fn test_run_requires_code_or_eval() {
    let ws = Workspace::new();
    sandframe()
        .arg("run")
        .arg("--data")
        .arg(ws.data())
        .assert()
        .failure();
}

#[test]
fn test_run_rejects_non_positive_timeout() {
    let ws = Workspace::new();
    sandframe()
        .arg("run")
        .arg("--data")
        .arg(ws.data())
        .args(["--eval", "result = 1", "--timeout", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("positive number of seconds"));
}

#[test]
fn test_run_with_missing_worker_is_spawn_failure() {
    let ws = Workspace::new();
    sandframe()
        .arg("run")
        .arg("--data")
        .arg(ws.data())
        .args(["--eval", "result = len(df)", "--format", "json"])
        .args(["--worker", "/nonexistent/sandframe-worker"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"spawn_failure\""));
}

// =============================================================================
// Execution
// =============================================================================

#[test]
fn test_run_scalar() {
    let Some(worker) = worker() else { return };
    let ws = Workspace::new();
    sandframe()
        .arg("run")
        .arg("--data")
        .arg(ws.data())
        .args(["--eval", "result = df['units'].sum()"])
        .arg("--worker")
        .arg(worker)
        .assert()
        .success()
        .stdout("19\n");
}

#[test]
fn test_run_strips_fences_from_script_file() {
    let Some(worker) = worker() else { return };
    let ws = Workspace::new();
    let script = ws.write(
        "script.md",
        "```python\nresult = df.groupby('region')['units'].sum()\n```\n",
    );
    let output = sandframe()
        .arg("run")
        .arg("--data")
        .arg(ws.data())
        .arg("--code")
        .arg(script)
        .args(["--format", "json"])
        .arg("--worker")
        .arg(worker)
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["kind"], "tabular");
    assert_eq!(json["columns"][0], "region");
}

#[test]
fn test_run_error_exits_non_zero() {
    let Some(worker) = worker() else { return };
    let ws = Workspace::new();
    sandframe()
        .arg("run")
        .arg("--data")
        .arg(ws.data())
        .args(["--eval", "result = df['missing']"])
        .arg("--worker")
        .arg(worker)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("runtime fault"));
}

#[test]
fn test_run_timeout() {
    let Some(worker) = worker() else { return };
    let ws = Workspace::new();
    sandframe()
        .arg("run")
        .arg("--data")
        .arg(ws.data())
        .args([
            "--eval",
            "result = [sum(range(1000000)) for i in range(100000)]",
            "--timeout",
            "0.5",
            "--format",
            "json",
        ])
        .arg("--worker")
        .arg(worker)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"timeout_exceeded\""));
}

#[test]
fn test_run_writes_raster_chart() {
    let Some(worker) = worker() else { return };
    let ws = Workspace::new();
    let png = ws.dir.path().join("chart.png");
    sandframe()
        .arg("run")
        .arg("--data")
        .arg(ws.data())
        .args(["--eval", "result = df.plot(kind='bar', x='region', y='units')"])
        .arg("--raster")
        .arg("--output")
        .arg(&png)
        .arg("--worker")
        .arg(worker)
        .assert()
        .success()
        .stdout(predicate::str::contains("image/png"));

    let bytes = fs::read(&png).unwrap();
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[test]
fn test_config_file_sets_chart_output() {
    let Some(worker) = worker() else { return };
    let ws = Workspace::new();
    let config = ws.write("sandframe.json", r#"{"chart_output": "raster"}"#);
    let output = sandframe()
        .arg("run")
        .arg("--data")
        .arg(ws.data())
        .args(["--eval", "result = df.plot(kind='line', y='units')", "--format", "json"])
        .arg("--config")
        .arg(config)
        .arg("--worker")
        .arg(worker)
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["kind"], "image");
    assert!(json["data"].as_str().unwrap().starts_with("iVBORw0KGgo"));
}

#[test]
fn test_ping() {
    let Some(worker) = worker() else { return };
    sandframe()
        .arg("ping")
        .arg("--worker")
        .arg(worker)
        .assert()
        .success()
        .stdout(predicate::str::contains("answered"));
}
