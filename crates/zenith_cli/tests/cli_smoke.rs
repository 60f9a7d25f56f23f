use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_path(file_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("zenith-{nanos}-{file_name}"))
}

fn zenith(store_path: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_zenith"));
    command
        .env("ZENITH_STORE_PATH", store_path)
        .env("ZENITH_CONFIG_PATH", store_path.with_extension("config.json"))
        .env("ZENITH_SESSION_PATH", store_path.with_extension("session.json"));
    command
}

#[test]
fn help_flag_prints_usage() {
    let store_path = temp_path("cli-smoke-help.json");

    let output = zenith(&store_path)
        .arg("--help")
        .output()
        .expect("failed to run help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"));
    assert!(stdout.contains("list"));
}

#[test]
fn unknown_command_is_invalid_input() {
    let store_path = temp_path("cli-smoke-unknown.json");

    let output = zenith(&store_path)
        .arg("frobnicate")
        .output()
        .expect("failed to run unknown command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: invalid_input"));
}

#[test]
fn local_backend_is_always_signed_in() {
    let store_path = temp_path("cli-smoke-whoami.json");

    let output = zenith(&store_path)
        .arg("whoami")
        .output()
        .expect("failed to run whoami");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Signed in as local"));
}

#[test]
fn whoami_json_reports_session() {
    let store_path = temp_path("cli-smoke-whoami-json.json");

    let output = zenith(&store_path)
        .args(["whoami", "--json"])
        .output()
        .expect("failed to run whoami");

    assert!(output.status.success());
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("whoami json");
    assert_eq!(payload["session"]["user_id"], "local");
}

#[test]
fn empty_store_lists_no_tasks() {
    let store_path = temp_path("cli-smoke-list.json");

    let output = zenith(&store_path)
        .arg("list")
        .output()
        .expect("failed to run list");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("All Tasks"));
    assert!(stdout.contains("No tasks"));
    assert!(!store_path.exists());
}
