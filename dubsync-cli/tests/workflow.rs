use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;

use dubsync_core::registry;
use dubsync_core::types::{cell_at, text_row};
use dubsync_core::{ColumnLabel, Table, TableRef, TableSchema, TableStore};
use dubsync_sync::FileTableStore;
use tempfile::TempDir;

fn dubsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("dubsync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

fn init(home: &Path) {
    dubsync_cmd(home).arg("init").assert().success();
}

/// Table `X` with key 42 holding "B" at the prod source and "A" in the witness.
fn seed_x(home: &Path) {
    registry::save_schema_at(
        home,
        &TableSchema {
            labels: vec![ColumnLabel::Key, ColumnLabel::PlainDiff],
            ..TableSchema::fallback("X")
        },
    )
    .expect("schema");

    let store = FileTableStore::open_at(home).expect("store");
    let header = vec!["Key".to_string(), "Status".to_string()];
    let mut source = Table::new(header.clone());
    source.rows.push(text_row(&["42", "B"]));
    store
        .put_table(&TableRef::new("prod", "X"), &source)
        .expect("source");
    let mut witness = Table::new(header);
    witness.rows.push(text_row(&["42", "A"]));
    store
        .put_table(&TableRef::new("live", "X"), &witness)
        .expect("witness");
}

fn witness_status(home: &Path) -> String {
    let rows = FileTableStore::open_at(home)
        .expect("store")
        .get_all_rows(&TableRef::new("live", "X"))
        .expect("rows");
    cell_at(&rows[0], 1).as_text()
}

#[test]
fn init_is_idempotent() {
    let home = TempDir::new().expect("home");
    dubsync_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Wrote config"))
        .stdout(contains("ops/Queue"));

    dubsync_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Config already present"));
}

#[test]
fn enqueue_preview_and_run() {
    let home = TempDir::new().expect("home");
    init(home.path());
    seed_x(home.path());

    dubsync_cmd(home.path())
        .args(["enqueue", "X", "42", "--env", "prod", "--user", "ana"])
        .assert()
        .success()
        .stdout(contains("at row 1"));

    dubsync_cmd(home.path())
        .args(["diff", "1"])
        .assert()
        .success()
        .stdout(contains("update"))
        .stdout(contains("* Status: A → B"));
    assert_eq!(witness_status(home.path()), "A", "preview must not write");

    dubsync_cmd(home.path())
        .arg("run")
        .assert()
        .success()
        .stdout(contains("Queue drained"))
        .stdout(contains("1 incorporated"));
    assert_eq!(witness_status(home.path()), "B");

    let output = dubsync_cmd(home.path())
        .args(["status", "--json"])
        .output()
        .expect("status");
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).expect("status json");
    assert_eq!(status["queue"]["Incorporated"], serde_json::json!(1));
    assert!(status["control"]["nextRunAt"].is_string());
}

#[test]
fn scheduled_run_waits_for_next_run_at() {
    let home = TempDir::new().expect("home");
    init(home.path());
    dubsync_cmd(home.path()).arg("run").assert().success();

    dubsync_cmd(home.path())
        .args(["run", "--scheduled"])
        .assert()
        .success()
        .stdout(contains("Skipped (NotDue)"));

    dubsync_cmd(home.path())
        .args(["control", "--due-now"])
        .assert()
        .success();
    dubsync_cmd(home.path())
        .args(["run", "--scheduled"])
        .assert()
        .success()
        .stdout(contains("Queue drained"));
}

#[test]
fn enqueue_rejects_unknown_environment() {
    let home = TempDir::new().expect("home");
    init(home.path());
    dubsync_cmd(home.path())
        .args(["enqueue", "X", "42", "--env", "staging", "--user", "ana"])
        .assert()
        .failure()
        .stderr(contains("staging"));
}

#[test]
fn diff_of_missing_row_fails() {
    let home = TempDir::new().expect("home");
    init(home.path());
    dubsync_cmd(home.path())
        .args(["diff", "7"])
        .assert()
        .failure()
        .stderr(contains("queue row 7"));
}

#[test]
fn control_toggles_are_persisted() {
    let home = TempDir::new().expect("home");
    init(home.path());
    dubsync_cmd(home.path())
        .args(["control", "--disable", "--verbose", "on", "--batch-size", "5"])
        .assert()
        .success()
        .stdout(contains("\"enabled\": false"))
        .stdout(contains("\"batchSize\": 5"));

    dubsync_cmd(home.path())
        .args(["run", "--scheduled"])
        .assert()
        .success()
        .stdout(contains("Skipped (Disabled)"));

    dubsync_cmd(home.path())
        .args(["control", "--verbose", "maybe"])
        .assert()
        .failure();
}

#[test]
fn labels_show_registered_columns() {
    let home = TempDir::new().expect("home");
    init(home.path());
    seed_x(home.path());

    dubsync_cmd(home.path())
        .arg("labels")
        .assert()
        .success()
        .stdout(contains("X"))
        .stdout(contains("K ="));

    dubsync_cmd(home.path())
        .args(["labels", "Nope"])
        .assert()
        .failure()
        .stderr(contains("no labels for table 'Nope'"));
}

#[test]
fn unlock_reports_missing_lock() {
    let home = TempDir::new().expect("home");
    dubsync_cmd(home.path())
        .args(["unlock", "queue"])
        .assert()
        .success()
        .stdout(contains("No lock named 'queue'"));
}

#[test]
fn unknown_scan_job_fails() {
    let home = TempDir::new().expect("home");
    init(home.path());
    dubsync_cmd(home.path())
        .args(["scan", "nope"])
        .assert()
        .failure()
        .stderr(contains("nope"));
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");
    dubsync_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
}

#[test]
fn tick_fires_continuations_even_when_the_run_fails() {
    let home = TempDir::new().expect("home");
    init(home.path());
    dubsync_cmd(home.path())
        .args(["enqueue", "Nope", "N1", "--env", "prod", "--user", "ana"])
        .assert()
        .success();
    let ws = dubsync_sync::Workspace::open_at(home.path()).expect("workspace");
    ws.continuations
        .schedule_once("scan:health", std::time::Duration::ZERO)
        .expect("schedule");

    dubsync_cmd(home.path())
        .arg("tick")
        .assert()
        .failure()
        .stdout(contains("Scheduled run failed"))
        .stdout(contains("Scan 'health' complete"));
    assert!(ws.continuations.pending().expect("pending").is_empty());
}
