//! Smoke tests for the surveyor CLI

#![allow(deprecated)] // Command::cargo_bin
#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn surveyor() -> Command {
    Command::cargo_bin("surveyor").expect("surveyor binary should exist")
}

// ============================================================================
// Basic CLI Tests
// ============================================================================

#[test]
fn test_version_flag() {
    surveyor()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.4.0"));
}

#[test]
fn test_help_lists_subcommands() {
    surveyor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("mail"));
}

#[test]
fn test_no_args_fails() {
    surveyor().assert().failure();
}

// ============================================================================
// config
// ============================================================================

#[test]
fn test_config_show_defaults() {
    surveyor()
        .args(["config", "show"])
        .env_remove("SURVEYOR_CONFIG")
        .assert()
        .success()
        .stdout(predicate::str::contains("stepper:"))
        .stdout(predicate::str::contains("refresh: reload"));
}

#[test]
fn test_config_show_reads_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("surveyor.yaml");
    fs::write(&path, "refresh: in_place\n").unwrap();
    surveyor()
        .args(["config", "show", "--format", "json", "--file"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"refresh\": \"in_place\""));
}

#[test]
fn test_config_validate_ok() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("surveyor.yaml");
    fs::write(
        &path,
        "inbox:\n  max_attempts: 3\n  interval_ms: 1000\n  per_attempt_timeout_ms: 5000\n",
    )
    .unwrap();
    surveyor()
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("worst case 18s"))
        .stderr(predicate::str::contains("is valid"));
}

#[test]
fn test_config_validate_quiet_hides_status() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("surveyor.yaml");
    fs::write(&path, "refresh: reload\n").unwrap();
    surveyor()
        .args(["-q", "config", "validate"])
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("is valid").not());
}

#[test]
fn test_config_validate_rejects_zero_attempts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("surveyor.yaml");
    fs::write(
        &path,
        "stepper:\n  max_attempts: 0\n  interval_ms: 2000\n  per_attempt_timeout_ms: 8000\n",
    )
    .unwrap();
    surveyor()
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("stepper: max_attempts must be at least 1"));
}

#[test]
fn test_config_validate_missing_file() {
    surveyor()
        .args(["config", "validate", "/nonexistent/surveyor.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

// ============================================================================
// mail
// ============================================================================

#[test]
fn test_mail_query_renders() {
    surveyor()
        .args(["mail", "query", "--subject", "Your application", "--to", "owner@acme.test"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"subject:"Your application" to:owner@acme.test"#,
        ));
}

#[test]
fn test_mail_query_raw_json() {
    surveyor()
        .args(["mail", "query", "--json", "--raw", "from:billing invoice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"from\": \"billing\""))
        .stdout(predicate::str::contains("invoice"));
}

#[test]
fn test_mail_query_requires_criteria() {
    surveyor()
        .args(["mail", "query"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid argument"));
}
