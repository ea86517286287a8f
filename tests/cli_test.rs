//! CLI Integration Tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_options() {
    Command::cargo_bin("local-uploadr")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--log-level"));
}

#[test]
fn test_version() {
    Command::cargo_bin("local-uploadr")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_config_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("local-uploadr")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure();
}

#[test]
fn test_invalid_config_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        "server:\n  address: \"127.0.0.1:0\"\nroutes:\n  - path: /up\n    mode: raw\n  - path: /up\n    mode: single\n",
    )
    .unwrap();

    Command::cargo_bin("local-uploadr")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate").or(predicate::str::contains("duplicate")));
}
