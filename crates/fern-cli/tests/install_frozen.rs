//! Integration tests for `fern install` lockfile handling.

use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-p", "fern-cli", "--bin", "fern", "--"]);
    cmd
}

fn create_package_json(dir: &std::path::Path, name: &str) {
    let content = format!(r#"{{"name": "{name}", "version": "1.0.0", "dependencies": {{}}}}"#);
    fs::write(dir.join("package.json"), content).unwrap();
}

/// `fern install --frozen-lockfile` fails when no lockfile exists.
#[test]
fn test_install_frozen_fails_without_lock() {
    let dir = tempdir().unwrap();
    create_package_json(dir.path(), "test-project");

    let output = cargo_bin()
        .args(["install", "--frozen-lockfile", "--offline", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run fern install");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !output.status.success(),
        "install --frozen-lockfile should fail without a lockfile. stderr: {stderr}"
    );
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr.contains("PKG_LOCK_NOT_FOUND"), "stderr: {stderr}");
}

/// `--json` emits a single JSON object even on error.
#[test]
fn test_install_frozen_json_output_on_error() {
    let dir = tempdir().unwrap();
    create_package_json(dir.path(), "test-project");

    let output = cargo_bin()
        .args(["--json", "install", "--frozen-lockfile", "--offline", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run fern install");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|_| panic!("stdout should be valid JSON: {stdout}"));

    assert_eq!(json["ok"], serde_json::Value::Bool(false));
    assert_eq!(json["error"]["code"], "PKG_LOCK_NOT_FOUND");
}

/// An empty-dependency project installs offline and writes a lockfile.
#[test]
fn test_install_empty_project_offline() {
    let dir = tempdir().unwrap();
    create_package_json(dir.path(), "empty-project");

    let output = cargo_bin()
        .args(["install", "--offline", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run fern install");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(dir.path().join("fern.lock").is_file());
}
