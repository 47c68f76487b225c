//! Normal-mode behaviour of the `machina` binary.

use std::path::Path;

use machina::plugin::{PLUGIN_ENV_DRIVER_NAME, PLUGIN_ENV_KEY};
use tokio::process::Command;

const MACHINA: &str = env!("CARGO_BIN_EXE_machina");

async fn machina(args: &[&str]) -> std::process::Output {
    Command::new(MACHINA)
        .args(args)
        .env_remove(PLUGIN_ENV_KEY)
        .env_remove(PLUGIN_ENV_DRIVER_NAME)
        .output()
        .await
        .unwrap()
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn describes_local_host() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "none.json", r#"{"MachineName": "edge-1"}"#);

    let output = machina(&["none", &config]).await;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    // Normal mode never prints a plugin address
    assert!(stdout.lines().all(|l| l.parse::<std::net::SocketAddr>().is_err()));
    assert!(stdout.contains("name: edge-1"));
    assert!(stdout.contains("driver: none"));
}

#[tokio::test]
async fn describes_host_through_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let driver_config = write(dir.path(), "none.json", r#"{"MachineName": "edge-2"}"#);
    let client_config = write(
        dir.path(),
        "machina.toml",
        "[client]\nclient_type = \"rpc\"\nhandshake_timeout_ms = 10000\n",
    );

    let output = machina(&["--config", &client_config, "none", &driver_config]).await;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("name: edge-2"));
    assert!(stdout.contains("driver: none"));
}

#[tokio::test]
async fn reports_error_kind() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "bad.json", "?");

    let output = machina(&["virtualbox", &config]).await;
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error[InvalidConfig]"), "{stderr}");

    let output = machina(&["parallels", &config]).await;
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error[UnknownDriver]"), "{stderr}");

    let output = machina(&["--client", "grpc", "none", &config]).await;
    assert!(!output.status.success());
}
