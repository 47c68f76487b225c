//! Plugin process management and the stdout address handshake.

use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{PLUGIN_ENV_ACCEPT_TIMEOUT, PLUGIN_ENV_DRIVER_NAME, PLUGIN_ENV_KEY, PLUGIN_ENV_VAL};
use crate::error::{MachineError, Result};

/// A running plugin process.
///
/// The child is spawned with `kill_on_drop`, so dropping this value (or a
/// future that owns it) kills the plugin. Call [`PluginProcess::shutdown`] for
/// an orderly exit.
pub struct PluginProcess {
    child: Child,
    driver_name: String,
    addr: SocketAddr,
}

impl PluginProcess {
    /// Spawn `binary` in plugin mode for `driver_name`, read its address
    /// line and dial it.
    ///
    /// The whole handshake (address line plus dial) is bounded by
    /// `handshake_timeout`.
    pub async fn launch(
        binary: &Path,
        driver_name: &str,
        handshake_timeout: Duration,
    ) -> Result<(Self, TcpStream)> {
        let mut cmd = Command::new(binary);
        cmd.env(PLUGIN_ENV_KEY, PLUGIN_ENV_VAL)
            .env(PLUGIN_ENV_DRIVER_NAME, driver_name)
            .env(
                PLUGIN_ENV_ACCEPT_TIMEOUT,
                handshake_timeout.as_millis().to_string(),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| MachineError::PluginLaunchFailed {
            driver: driver_name.to_string(),
            source: e,
        })?;

        debug!(
            "Spawned plugin {} for driver '{}' (pid {:?})",
            binary.display(),
            driver_name,
            child.id()
        );

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                reap(&mut child).await;
                return Err(MachineError::handshake(driver_name, "stdout was not captured"));
            }
        };

        match timeout(handshake_timeout, handshake(driver_name, stdout)).await {
            Ok(Ok((addr, stream))) => {
                info!("Plugin for driver '{}' ready at {}", driver_name, addr);
                Ok((
                    Self {
                        child,
                        driver_name: driver_name.to_string(),
                        addr,
                    },
                    stream,
                ))
            }
            Ok(Err(e)) => {
                reap(&mut child).await;
                Err(e)
            }
            Err(_) => {
                reap(&mut child).await;
                Err(MachineError::handshake(
                    driver_name,
                    format!("no address received within {:?}", handshake_timeout),
                ))
            }
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Wait up to `grace` for the plugin to exit, then kill it.
    pub async fn shutdown(mut self, grace: Duration) {
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    "Plugin for driver '{}' exited with {}",
                    self.driver_name, status
                );
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for plugin '{}': {}", self.driver_name, e);
                reap(&mut self.child).await;
            }
            Err(_) => {
                warn!(
                    "Plugin for driver '{}' did not exit within {:?}, killing it",
                    self.driver_name, grace
                );
                reap(&mut self.child).await;
            }
        }
    }
}

/// Read the address line, validate it and dial it.
async fn handshake(driver_name: &str, stdout: ChildStdout) -> Result<(SocketAddr, TcpStream)> {
    let mut lines = BufReader::new(stdout).lines();

    let line = lines
        .next_line()
        .await
        .map_err(|e| MachineError::handshake(driver_name, format!("reading address: {}", e)))?
        .ok_or_else(|| {
            MachineError::handshake(driver_name, "plugin exited before announcing its address")
        })?;

    let addr = parse_plugin_addr(&line).map_err(|reason| MachineError::handshake(driver_name, reason))?;

    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| MachineError::handshake(driver_name, format!("dial {}: {}", addr, e)))?;
    stream
        .set_nodelay(true)
        .map_err(|e| MachineError::handshake(driver_name, e.to_string()))?;

    // Keep draining so the plugin never blocks on a full pipe.
    let name = driver_name.to_string();
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("[plugin {}] {}", name, line);
        }
    });

    Ok((addr, stream))
}

/// Parse an announced address, accepting loopback addresses only.
pub(crate) fn parse_plugin_addr(line: &str) -> std::result::Result<SocketAddr, String> {
    let trimmed = line.trim();
    let addr: SocketAddr = trimmed
        .parse()
        .map_err(|_| format!("invalid address line {:?}", trimmed))?;

    if !addr.ip().is_loopback() {
        return Err(format!("refusing non-loopback plugin address {}", addr));
    }
    if addr.port() == 0 {
        return Err(format!("plugin announced port 0 ({})", addr));
    }
    Ok(addr)
}

async fn reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Failed to kill plugin process: {}", e);
    }
}
