use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("sigloop")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hub"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_hub_help_shows_concurrency_flag() {
    cargo_bin_cmd!("sigloop")
        .args(["hub", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allow-concurrent-input"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("sigloop")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1"));
}
