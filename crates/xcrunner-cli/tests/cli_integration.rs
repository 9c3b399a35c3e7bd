use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_exits_zero() {
    Command::cargo_bin("xcrunner")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("xcrunner"))
        .stdout(predicate::str::contains("run-xctest"));
}

#[test]
fn test_proxy_help_lists_both_actions() {
    Command::cargo_bin("xcrunner")
        .unwrap()
        .args(["proxy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("enable"))
        .stdout(predicate::str::contains("disable"));
}

#[test]
fn test_proxy_enable_rejects_invalid_port() {
    Command::cargo_bin("xcrunner")
        .unwrap()
        .args(["proxy", "enable", "127.0.0.1", "not-a-port"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_alive_requires_bundle_id() {
    Command::cargo_bin("xcrunner")
        .unwrap()
        .arg("alive")
        .assert()
        .failure()
        .stderr(predicate::str::contains("BUNDLE_ID"));
}

#[test]
fn test_run_xctest_requires_destination() {
    Command::cargo_bin("xcrunner")
        .unwrap()
        .args(["run-xctest", "Runner.xctestrun"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--destination"));
}

#[test]
fn test_unknown_subcommand() {
    Command::cargo_bin("xcrunner")
        .unwrap()
        .arg("totally-fake-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
