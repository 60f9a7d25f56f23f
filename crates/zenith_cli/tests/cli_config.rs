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

struct Paths {
    store: PathBuf,
    config: PathBuf,
    session: PathBuf,
}

impl Paths {
    fn new(name: &str) -> Self {
        let store = temp_path(name);
        Self {
            config: store.with_extension("config.json"),
            session: store.with_extension("session.json"),
            store,
        }
    }

    fn zenith(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_zenith"));
        command
            .env("ZENITH_STORE_PATH", &self.store)
            .env("ZENITH_CONFIG_PATH", &self.config)
            .env("ZENITH_SESSION_PATH", &self.session);
        command
    }

    fn cleanup(&self) {
        for path in [&self.store, &self.config, &self.session] {
            std::fs::remove_file(path).ok();
        }
    }
}

// Nothing listens on the discard port, so any request fails fast.
const UNREACHABLE_BACKEND: &str = "http://127.0.0.1:9";

fn write_remote_config(path: &Path) {
    let config = serde_json::json!({
        "backend_url": UNREACHABLE_BACKEND,
        "anon_key": "public-anon-key"
    });
    std::fs::write(path, serde_json::to_string(&config).unwrap()).unwrap();
}

#[test]
fn malformed_override_is_invalid_input() {
    let paths = Paths::new("cli-config-malformed.json");

    let output = paths
        .zenith()
        .args(["whoami", "--config-override", "themenoir"])
        .output()
        .expect("failed to run whoami");
    paths.cleanup();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: invalid_input - override must be in KEY=VALUE format"));
}

#[test]
fn unknown_recovery_override_is_rejected() {
    let paths = Paths::new("cli-config-recovery.json");

    let output = paths
        .zenith()
        .args(["list", "--config-override", "recovery=pray"])
        .output()
        .expect("failed to run list");
    paths.cleanup();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: invalid_input - unknown recovery policy 'pray'"));
}

#[test]
fn unreadable_config_falls_back_to_local_defaults() {
    let paths = Paths::new("cli-config-corrupt.json");
    std::fs::write(&paths.config, "{ not json").unwrap();

    let output = paths
        .zenith()
        .arg("whoami")
        .output()
        .expect("failed to run whoami");
    paths.cleanup();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Signed in as local"));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ignoring unreadable config"));
}

#[test]
fn invalid_backend_url_override_is_invalid_data() {
    let paths = Paths::new("cli-config-bad-url.json");

    let output = paths
        .zenith()
        .args(["whoami", "--config-override", "backend_url=not a url"])
        .output()
        .expect("failed to run whoami");
    paths.cleanup();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: invalid_data"));
}

#[test]
fn hosted_backend_requires_sign_in_before_task_commands() {
    let paths = Paths::new("cli-config-remote.json");
    write_remote_config(&paths.config);

    let whoami = paths
        .zenith()
        .arg("whoami")
        .output()
        .expect("failed to run whoami");
    let list = paths
        .zenith()
        .arg("list")
        .output()
        .expect("failed to run list");
    paths.cleanup();

    assert!(whoami.status.success());
    assert!(String::from_utf8_lossy(&whoami.stdout).contains("Not signed in"));

    assert!(!list.status.success());
    let stderr = String::from_utf8_lossy(&list.stderr);
    assert!(stderr.contains("ERROR: unauthenticated"));
    assert!(!paths.store.exists());
}

#[test]
fn blank_backend_override_switches_back_to_local_store() {
    let paths = Paths::new("cli-config-local-override.json");
    write_remote_config(&paths.config);

    let output = paths
        .zenith()
        .args(["whoami", "--config-override", "backend_url="])
        .output()
        .expect("failed to run whoami");
    paths.cleanup();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Signed in as local"));
}

#[test]
fn stored_session_is_restored_and_logout_clears_it() {
    let paths = Paths::new("cli-config-session.json");
    write_remote_config(&paths.config);
    let session = serde_json::json!({
        "access_token": "token-abc",
        "refresh_token": null,
        "user_id": "user-1",
        "email": "me@example.com",
        "expires_at": "2099-01-01T00:00:00Z"
    });
    std::fs::write(&paths.session, serde_json::to_string(&session).unwrap()).unwrap();

    let whoami = paths
        .zenith()
        .arg("whoami")
        .output()
        .expect("failed to run whoami");
    let logout = paths
        .zenith()
        .arg("logout")
        .output()
        .expect("failed to run logout");
    let session_left = paths.session.exists();
    paths.cleanup();

    assert!(whoami.status.success());
    assert!(String::from_utf8_lossy(&whoami.stdout).contains("Signed in as me@example.com"));

    assert!(logout.status.success());
    assert!(String::from_utf8_lossy(&logout.stdout).contains("Not signed in"));
    assert!(!session_left);
}

#[test]
fn expired_session_counts_as_signed_out() {
    let paths = Paths::new("cli-config-expired.json");
    write_remote_config(&paths.config);
    let session = serde_json::json!({
        "access_token": "token-abc",
        "user_id": "user-1",
        "expires_at": "2001-01-01T00:00:00Z"
    });
    std::fs::write(&paths.session, serde_json::to_string(&session).unwrap()).unwrap();

    let output = paths
        .zenith()
        .arg("whoami")
        .output()
        .expect("failed to run whoami");
    paths.cleanup();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Not signed in"));
}
