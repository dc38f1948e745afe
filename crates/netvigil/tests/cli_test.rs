//! Integration tests for the `netvigil` CLI binary.
//!
//! These cover argument parsing, config handling and the engine-bound
//! commands that need no reachable devices.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `netvigil` binary with env isolation.
///
/// Clears `NETVIGIL_*` variables and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn netvigil_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("netvigil");
    cmd.env("HOME", "/tmp/netvigil-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/netvigil-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("NETVIGIL_CONFIG")
        .env_remove("NETVIGIL_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

/// Same, reading the given config file.
fn with_config(path: &Path) -> assert_cmd::Command {
    let mut cmd = netvigil_cmd();
    cmd.arg("--config").arg(path);
    cmd
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("netvigil.toml");
    std::fs::write(&path, body).unwrap();
    path
}

const INVENTORY: &str = r#"
keyring = false

[profiles.ops]
username = "monitor"
password = "hunter2"

[[devices]]
id = "core"
address = "192.0.2.1"
type = "routeros"
profile = "ops"

[[devices]]
id = "cam"
name = "Door camera"
address = "192.0.2.50"
type = "ping"
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = netvigil_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "{stderr}");
}

#[test]
fn help_lists_commands() {
    netvigil_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("probe"))
            .and(predicate::str::contains("scan"))
            .and(predicate::str::contains("devices")),
    );
}

#[test]
fn version_flag() {
    netvigil_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("netvigil"));
}

#[test]
fn completions_zsh() {
    netvigil_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn invalid_output_format_is_rejected() {
    netvigil_cmd()
        .args(["--output", "xml", "devices", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("possible values"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_path_honors_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    with_config(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn config_check_counts_inventory() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, INVENTORY);
    with_config(&path)
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 profiles, 2 devices, 0 connections"));
}

#[test]
fn config_show_masks_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, INVENTORY);
    with_config(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("****").and(predicate::str::contains("hunter2").not()));
}

#[test]
fn invalid_setting_exits_with_usage_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[engine]\nconcurrency = 0\n");
    with_config(&path)
        .args(["config", "check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("engine.concurrency"));
}

#[test]
fn unknown_profile_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let body = INVENTORY.replace("profile = \"ops\"", "profile = \"nope\"");
    let path = write_config(&dir, &body);
    with_config(&path)
        .args(["devices", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown profile"));
}

#[test]
fn config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh").join("netvigil.toml");

    with_config(&path).args(["config", "init"]).assert().success();
    assert!(path.exists());
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("[engine]"), "{written}");

    with_config(&path).args(["config", "init"]).assert().code(6);
    with_config(&path)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

// ── Engine-bound commands ───────────────────────────────────────────

#[test]
fn devices_list_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, INVENTORY);
    let output = with_config(&path)
        .args(["-o", "json", "devices", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let devices: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let list = devices.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["id"], "cam");
    assert_eq!(list[0]["name"], "Door camera");
    assert_eq!(list[0]["status"], "unknown");
}

#[test]
fn devices_list_plain_prints_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, INVENTORY);
    with_config(&path)
        .args(["-o", "plain", "devices", "list"])
        .assert()
        .success()
        .stdout("cam\ncore\n");
}

#[test]
fn probing_an_unknown_device_exits_with_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, INVENTORY);
    with_config(&path)
        .args(["probe", "ghost"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn oversized_scan_is_rejected() {
    netvigil_cmd()
        .args(["scan", "10.0.0.0/8"])
        .assert()
        .code(2);
}

#[test]
fn run_once_with_empty_inventory_writes_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "keyring = false\n");
    let state = dir.path().join("state.json");

    let output = with_config(&config)
        .args(["-o", "json", "run", "--once", "--state-out"])
        .arg(&state)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["cycle"]["devices"], 0);
    assert_eq!(summary["traffic"]["connections"], 0);

    let dump: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&state).unwrap()).unwrap();
    assert!(dump["devices"].as_array().unwrap().is_empty());
    assert!(dump["generated_at"].is_string());
}
