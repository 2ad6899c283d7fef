//! End-to-end tests for the drover binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn drover() -> Command {
    Command::cargo_bin("drover").unwrap()
}

#[test]
fn test_help_lists_subcommands() {
    drover()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("implement"))
        .stdout(predicate::str::contains("health"))
        .stdout(predicate::str::contains("expand"));
}

#[test]
fn test_version() {
    drover()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("drover"));
}

#[test]
fn test_expand_ranges() {
    drover()
        .args(["expand", "1-4", "6", "8-10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 2 3 4 6 8 9 10"));
}

#[test]
fn test_expand_rejects_garbage_only_input() {
    drover()
        .args(["expand", "not-a-task"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_implement_requires_tasks() {
    drover()
        .args(["implement", "myproject"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_implement_reports_missing_agent_binary() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[agent]\nbinary = \"no-such-agent-binary-3f9a\"\n",
    )
    .unwrap();

    drover()
        .args(["implement", "myproject", "1"])
        .arg("--config")
        .arg(&config_path)
        .arg("-w")
        .arg(dir.path())
        .assert()
        .failure()
        .code(6)
        .stderr(predicate::str::contains("no-such-agent-binary-3f9a"));
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    drover()
        .args(["implement", "myproject", "1", "--config", "/nonexistent/drover.toml"])
        .assert()
        .failure()
        .code(7);
}
