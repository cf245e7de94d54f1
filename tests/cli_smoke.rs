//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("vmvault");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("vmvault");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve").and(predicate::str::contains("migrate")));
}

#[test]
fn migrate_creates_the_database() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let database = tmp.path().join("ledger.db");
    let url = format!("sqlite://{}?mode=rwc", database.display());

    let mut cmd = cargo_bin_cmd!("vmvault");
    cmd.current_dir(tmp.path())
        .env("VMVAULT_DATABASE_URL", &url)
        .env("RUST_LOG", "error")
        .arg("migrate")
        .assert()
        .success();

    assert!(database.exists(), "database file should be created");
}

#[test]
fn invalid_configuration_is_reported() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));

    let mut cmd = cargo_bin_cmd!("vmvault");
    cmd.current_dir(tmp.path())
        .env("VMVAULT_XAPI_SCHEME", "gopher")
        .arg("migrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("xapi_scheme"));
}
