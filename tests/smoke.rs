//! Smoke tests -- verify the binary runs and reconciles a run on disk.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn write(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

/// A benchdash command isolated from any config in the caller's environment.
fn benchdash(cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("benchdash").unwrap();
    cmd.current_dir(cwd)
        .env_remove("BENCHDASH_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn seed_finished_run(root: &Path) {
    let run = root.join("runs/2025-06-01__12-00-00");
    write(
        &run.join("hello-world/hello-world.1-of-1/results.json"),
        r#"{"is_resolved": true}"#,
    );
    write(
        &run.join("fix-git/fix-git.1-of-1/sessions/tests.log"),
        "FAILED tests/test_outputs.py::test_branch\n1 failed, 3 passed in 2.1s\n",
    );
    write(&run.join("results.json"), r#"{"results": []}"#);
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("benchdash")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Status reconciliation"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("benchdash")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("benchdash"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("benchdash")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_watch_subcommand_exists() {
    Command::cargo_bin("benchdash")
        .unwrap()
        .args(["watch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--interval"));
}

#[test]
fn test_batch_list_subcommand_exists() {
    Command::cargo_bin("benchdash")
        .unwrap()
        .args(["batch", "list", "--help"])
        .assert()
        .success();
}

#[test]
fn test_run_json_reports_task_statuses() {
    let dir = tempfile::TempDir::new().unwrap();
    seed_finished_run(dir.path());

    benchdash(dir.path())
        .args(["--runs-dir", "runs", "run", "2025-06-01__12-00-00", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""state": "completed""#))
        .stdout(predicate::str::contains(r#""name": "hello-world""#))
        .stdout(predicate::str::contains(r#""status": "passed""#))
        .stdout(predicate::str::contains(r#""status": "failed""#));
}

#[test]
fn test_runs_table_lists_run() {
    let dir = tempfile::TempDir::new().unwrap();
    seed_finished_run(dir.path());

    benchdash(dir.path())
        .args(["--runs-dir", "runs", "runs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2025-06-01__12-00-00"))
        .stdout(predicate::str::contains("50.0%"));
}

#[test]
fn test_unknown_run_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("runs")).unwrap();

    benchdash(dir.path())
        .args(["--runs-dir", "runs", "run", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run not found"));
}

#[test]
fn test_logs_prints_test_transcript() {
    let dir = tempfile::TempDir::new().unwrap();
    seed_finished_run(dir.path());

    benchdash(dir.path())
        .args(["--runs-dir", "runs", "logs", "2025-06-01__12-00-00", "fix-git", "tests"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 failed, 3 passed"));
}

#[test]
fn test_batch_registry_persists_between_invocations() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("registry.db");
    let config = dir.path().join("benchdash.toml");
    fs::write(
        &config,
        format!("[storage]\ndb_path = {:?}\n", db.to_string_lossy()),
    )
    .unwrap();

    benchdash(dir.path())
        .args([
            "batch", "add", "20250601-120000", "--backend", "ecs", "--task", "hello-world",
            "--note", "nightly",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("registered (1 task(s))"));

    benchdash(dir.path())
        .args(["batch", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("20250601-120000"))
        .stdout(predicate::str::contains("nightly"));

    benchdash(dir.path())
        .args(["batch", "remove", "20250601-120000"])
        .assert()
        .success();

    benchdash(dir.path())
        .args(["batch", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No batches registered."));
}
