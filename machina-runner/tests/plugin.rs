//! End-to-end tests re-executing the `machina` binary in plugin mode.

use std::process::Stdio;
use std::time::Duration;

use machina::driver::DriverErrorKind;
use machina::prelude::*;
use machina::plugin::{PLUGIN_ENV_DRIVER_NAME, PLUGIN_ENV_KEY, PLUGIN_ENV_VAL};
use machina_protocol::{RpcRequest, RpcResponse, SetConfigRawParams, methods};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;

const MACHINA: &str = env!("CARGO_BIN_EXE_machina");

const VBOX_CONFIG: &[u8] = br#"{
    "IPAddress": "192.168.99.100",
    "MachineName": "minikube",
    "SSHUser": "docker",
    "SSHPort": 49152,
    "SSHKeyPath": "/home/user/.minikube/machines/minikube/id_rsa",
    "StorePath": "/home/user/.minikube",
    "CPU": 2,
    "Memory": 2048,
    "DiskSize": 20000,
    "NatNicType": "virtio",
    "Boot2DockerURL": "file:///home/user/.minikube/cache/iso/minikube.iso",
    "HostOnlyCIDR": "192.168.99.1/24",
    "HostOnlyNicType": "virtio",
    "HostOnlyPromiscMode": "deny",
    "UIType": "headless",
    "NoShare": true,
    "DNSProxy": true,
    "NoVTXCheck": false
}"#;

fn options() -> ClientOptions {
    let mut options = ClientOptions::default().plugin_binary(MACHINA);
    options.handshake_timeout_ms = 10_000;
    options.rpc_timeout_ms = 10_000;
    options.shutdown_timeout_ms = 2_000;
    options
}

fn rpc_client() -> RpcClient {
    RpcClient::new(options())
}

/// Poll `check` until it yields a value or five seconds pass.
async fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> Option<T> {
    for _ in 0..100 {
        if let Some(value) = check() {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

/// Gone entirely or a zombie awaiting reaping.
#[cfg(target_os = "linux")]
fn process_exited(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z')),
    }
}

#[tokio::test]
async fn plugin_mode_announces_dialable_address() {
    let mut child = Command::new(MACHINA)
        .env(PLUGIN_ENV_KEY, PLUGIN_ENV_VAL)
        .env(PLUGIN_ENV_DRIVER_NAME, "virtualbox")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let mut lines = BufReader::new(stdout).lines();
    let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let addr: std::net::SocketAddr = line.trim().parse().unwrap();
    assert!(addr.ip().is_loopback());

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    for (id, method) in [(1, methods::DRIVER_NAME), (2, methods::CLOSE)] {
        let mut request = serde_json::to_vec(&RpcRequest::new(method, serde_json::Value::Null, id))
            .unwrap();
        request.push(b'\n');
        writer.write_all(&request).await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, id);
        assert!(response.error.is_none());
        if method == methods::DRIVER_NAME {
            assert_eq!(response.result.unwrap()["value"], "virtualbox");
        }
    }

    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn plugin_mode_with_unknown_driver_exits_without_address() {
    let output = Command::new(MACHINA)
        .env(PLUGIN_ENV_KEY, PLUGIN_ENV_VAL)
        .env(PLUGIN_ENV_DRIVER_NAME, "parallels")
        .stdin(Stdio::null())
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[tokio::test]
async fn rpc_client_builds_virtualbox_host() {
    let client = rpc_client();
    let host = client.new_host("virtualbox", VBOX_CONFIG).await.unwrap();

    assert_eq!(host.name, "minikube");
    assert_eq!(host.name, host.driver().machine_name());
    assert_eq!(host.driver_name, "virtualbox");
    assert_eq!(host.driver_name, host.driver().driver_name());
    assert_eq!(host.raw_driver, VBOX_CONFIG);

    let driver = host.driver();
    assert_eq!(driver.ip().await.unwrap(), "192.168.99.100");
    assert_eq!(driver.ssh_port().await.unwrap(), 49152);
    assert_eq!(driver.ssh_username().await.unwrap(), "docker");
    assert_eq!(host.url().await.unwrap(), "tcp://192.168.99.100:2376");

    let persisted: serde_json::Value =
        serde_json::from_slice(&driver.get_config_raw().await.unwrap()).unwrap();
    assert_eq!(persisted["MachineName"], "minikube");
    assert_eq!(persisted["Memory"], 2048);

    client.close().await.unwrap();
}

#[tokio::test]
async fn rpc_client_rejects_malformed_config() {
    let client = rpc_client();
    let err = client.new_host("virtualbox", b"?").await.unwrap_err();
    assert!(matches!(err, MachineError::InvalidConfig { .. }), "{err}");
    assert_eq!(client.live_plugins(), 0);
}

#[tokio::test]
async fn rpc_client_unknown_driver_fails_handshake() {
    let client = rpc_client();
    let err = client.new_host("parallels", VBOX_CONFIG).await.unwrap_err();
    assert!(
        matches!(err, MachineError::PluginHandshakeFailed { .. }),
        "{err}"
    );
}

#[tokio::test]
async fn rpc_lifecycle_round_trip() {
    let client = rpc_client();
    let mut host = client
        .new_host("none", br#"{"MachineName": "edge-1"}"#)
        .await
        .unwrap();
    assert_eq!(host.state().await.unwrap(), MachineState::None);

    // Starting a machine that was never created is a remote failure
    let err = host.start().await.unwrap_err();
    match err {
        MachineError::RemoteDriver(inner) => {
            assert_eq!(inner.kind(), DriverErrorKind::InvalidState)
        }
        other => panic!("unexpected error: {other}"),
    }

    host.create().await.unwrap();
    host.start().await.unwrap();
    assert_eq!(host.state().await.unwrap(), MachineState::Running);

    host.restart().await.unwrap();
    host.stop().await.unwrap();
    assert_eq!(host.state().await.unwrap(), MachineState::Stopped);

    let persisted: serde_json::Value = serde_json::from_slice(&host.raw_driver).unwrap();
    assert_eq!(persisted["State"], "stopped");
    assert_eq!(persisted["MachineName"], "edge-1");

    host.remove().await.unwrap();
    assert_eq!(host.state().await.unwrap(), MachineState::None);

    client.close().await.unwrap();
}

#[tokio::test]
async fn closed_client_disconnects_hosts() {
    let client = rpc_client();
    let host = client
        .new_host("none", br#"{"MachineName": "edge-2"}"#)
        .await
        .unwrap();
    assert_eq!(client.live_plugins(), 1);

    client.close().await.unwrap();
    assert_eq!(client.live_plugins(), 0);

    let err = host.state().await.unwrap_err();
    match err {
        MachineError::RemoteDriver(inner) => {
            assert_eq!(inner.kind(), DriverErrorKind::Disconnected)
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn dropping_host_releases_plugin() {
    let client = rpc_client();
    let host = client
        .new_host("none", br#"{"MachineName": "edge-3"}"#)
        .await
        .unwrap();
    assert_eq!(client.live_plugins(), 1);
    let pids = client.plugin_pids();
    assert_eq!(pids.len(), 1);

    drop(host);
    assert_eq!(client.live_plugins(), 0);
    assert!(client.plugin_pids().is_empty());

    #[cfg(target_os = "linux")]
    assert!(
        eventually(|| process_exited(pids[0]).then_some(())).await.is_some(),
        "plugin {} still running",
        pids[0]
    );
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn abandoned_new_host_kills_plugin() {
    use std::os::unix::fs::PermissionsExt;

    // A plugin that records its pid and never announces an address
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("plugin.pid");
    let script = dir.path().join("machina-driver-stalled");
    std::fs::write(
        &script,
        format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", pid_file.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut options = options();
    options.plugin_binary = Some(script);
    let client = RpcClient::new(options);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(1500),
        client.new_host("virtualbox", VBOX_CONFIG),
    )
    .await;
    assert!(abandoned.is_err(), "handshake should still be pending");
    assert_eq!(client.live_plugins(), 0);

    let pid = eventually(|| {
        std::fs::read_to_string(&pid_file)
            .ok()
            .and_then(|pid| pid.trim().parse::<u32>().ok())
    })
    .await
    .expect("plugin never recorded its pid");
    assert!(
        eventually(|| process_exited(pid).then_some(())).await.is_some(),
        "plugin {} outlived the abandoned call",
        pid
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_clients_fail_independently() {
    let clients: Vec<RpcClient> = (0..4).map(|_| rpc_client()).collect();
    let configs: Vec<Vec<u8>> = (0..4)
        .map(|i| {
            if i == 2 {
                b"?".to_vec()
            } else {
                format!(r#"{{"MachineName": "c{}"}}"#, i).into_bytes()
            }
        })
        .collect();

    let results = futures::future::join_all(
        clients
            .iter()
            .zip(&configs)
            .map(|(client, raw)| client.new_host("virtualbox", raw)),
    )
    .await;

    for (i, result) in results.iter().enumerate() {
        match result {
            Ok(host) => {
                assert_ne!(i, 2);
                assert_eq!(host.name, format!("c{}", i));
            }
            Err(err) => {
                assert_eq!(i, 2, "{err}");
                assert!(matches!(err, MachineError::InvalidConfig { .. }), "{err}");
            }
        }
    }
    for (i, client) in clients.iter().enumerate() {
        assert_eq!(client.live_plugins(), usize::from(i != 2));
    }

    for client in &clients {
        client.close().await.unwrap();
    }
}

#[tokio::test]
async fn rpc_client_applies_store_and_certs_options() {
    let mut options = options();
    options.store_path = "/srv/machina".into();
    options.certs_dir = "/srv/machina/tls".into();
    let client = RpcClient::new(options);

    let host = client
        .new_host("virtualbox", br#"{"MachineName": "vm1"}"#)
        .await
        .unwrap();
    assert_eq!(host.auth_options.certs_dir, std::path::Path::new("/srv/machina/tls"));
    assert_eq!(host.machine_dir(), std::path::Path::new("/srv/machina/machines/vm1"));

    let persisted: serde_json::Value =
        serde_json::from_slice(&host.driver().get_config_raw().await.unwrap()).unwrap();
    assert_eq!(persisted["StorePath"], "/srv/machina");
    assert_eq!(
        host.driver().ssh_key_path().await.unwrap(),
        "/srv/machina/machines/vm1/id_rsa"
    );

    client.close().await.unwrap();
}

#[tokio::test]
async fn rpc_client_rejects_oversized_config() {
    let client = rpc_client();
    let raw = format!(
        r#"{{"MachineName": "big", "Boot2DockerURL": "{}"}}"#,
        "x".repeat(SetConfigRawParams::MAX_RAW_LEN)
    );

    let err = client.new_host("virtualbox", raw.as_bytes()).await.unwrap_err();
    assert!(matches!(err, MachineError::InvalidConfig { .. }), "{err}");
    assert_eq!(client.live_plugins(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_hosts_get_their_own_plugins() {
    let client = rpc_client();
    let names: Vec<String> = (0..4).map(|i| format!("m{}", i)).collect();
    let configs: Vec<Vec<u8>> = names
        .iter()
        .map(|name| format!(r#"{{"MachineName": "{}"}}"#, name).into_bytes())
        .collect();

    let hosts = futures::future::join_all(
        configs
            .iter()
            .map(|raw| client.new_host("virtualbox", raw)),
    )
    .await;

    let hosts: Vec<Host> = hosts.into_iter().map(|h| h.unwrap()).collect();
    for (host, name) in hosts.iter().zip(&names) {
        assert_eq!(&host.name, name);
        assert_eq!(host.driver_name, "virtualbox");
    }
    assert_eq!(client.live_plugins(), 4);

    client.close().await.unwrap();
}

#[tokio::test]
async fn api_client_type_selects_rpc() {
    let client = machina::new_api_client_with(ClientType::Rpc, options()).unwrap();
    assert_eq!(client.client_type(), ClientType::Rpc);

    let host = client.new_host("virtualbox", VBOX_CONFIG).await.unwrap();
    assert_eq!(host.name, "minikube");
    client.close().await.unwrap();

    let err = machina::new_api_client_with(7, options()).err().unwrap();
    assert!(matches!(err, MachineError::UnknownClientType(_)));
}
