//! CLI integration tests
//!
//! Only argument handling is covered here; nothing in these tests needs a cluster.

use assert_cmd::Command;
use predicates::prelude::*;

fn kubectl_d() -> Command {
    let mut cmd = Command::cargo_bin("kubectl-d")
        .expect("Failed to locate kubectl-d binary - ensure it's built before running tests");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    kubectl_d()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("DaemonSet"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("--namespace"));
}

#[test]
fn test_version_subcommand() {
    kubectl_d()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_exec_requires_command() {
    kubectl_d()
        .args(["exec", "fluentd"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("At least some command is required"));
}

#[test]
fn test_exec_help_mentions_separator() {
    kubectl_d()
        .args(["exec", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--tty"))
        .stdout(predicate::str::contains("--stdin"));
}

#[test]
fn test_log_requires_daemon_set() {
    kubectl_d()
        .arg("log")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<DAEMON_SET>"));
}

#[test]
fn test_logs_alias() {
    kubectl_d()
        .args(["logs", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--follow"));
}

#[test]
fn test_unknown_subcommand() {
    kubectl_d().arg("attach").assert().failure();
}

#[test]
fn test_invalid_output_format() {
    kubectl_d()
        .args(["get", "-o", "table"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("wide"));
}
