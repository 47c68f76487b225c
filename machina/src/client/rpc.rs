use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Client, ClientType};
use crate::core::{AuthOptions, ClientOptions, Host, with_store_path};
use crate::driver::{Driver, DriverError};
use crate::error::{MachineError, Result};
use crate::plugin::{PLUGIN_BINARY_PREFIX, PluginHandle, RpcDriver, current_binary_hosts_drivers};

/// Runs every driver in its own plugin process.
///
/// Each `new_host` call starts a fresh plugin; the returned host owns it and
/// the process is killed when the host is dropped. The client keeps weak
/// references so [`Client::close`] can shut down plugins still alive.
pub struct RpcClient {
    options: ClientOptions,
    plugins: Mutex<Vec<Weak<PluginHandle>>>,
}

impl RpcClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            plugins: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Number of plugins started by this client that are still running.
    pub fn live_plugins(&self) -> usize {
        let mut plugins = self.plugins.lock();
        plugins.retain(|p| p.strong_count() > 0);
        plugins.len()
    }

    /// Process ids of the plugins still running for this client.
    pub fn plugin_pids(&self) -> Vec<u32> {
        self.plugins
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|handle| handle.pid())
            .collect()
    }

    fn track(&self, handle: &Arc<PluginHandle>) {
        let mut plugins = self.plugins.lock();
        plugins.retain(|p| p.strong_count() > 0);
        plugins.push(Arc::downgrade(handle));
    }

    fn plugin_binary(&self, driver_name: &str) -> Result<PathBuf> {
        locate_plugin(
            driver_name,
            self.options.plugin_binary.as_deref(),
            current_binary_hosts_drivers(),
            std::env::var_os("PATH"),
        )
        .map_err(|source| MachineError::PluginLaunchFailed {
            driver: driver_name.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Client for RpcClient {
    async fn new_host(&self, driver_name: &str, raw_driver: &[u8]) -> Result<Host> {
        let binary = self.plugin_binary(driver_name)?;
        debug!(
            "Launching plugin {} for driver '{}'",
            binary.display(),
            driver_name
        );

        let handle = Arc::new(PluginHandle::launch(&binary, driver_name, &self.options).await?);
        self.track(&handle);

        let raw = with_store_path(raw_driver, &self.options.store_path);
        let mut driver = RpcDriver::new(handle.clone());
        if let Err(e) = driver.set_config_raw(&raw).await {
            handle.close().await;
            return Err(remote_config_error(driver_name, e));
        }

        let host = Host::new(Box::new(driver), raw.into_owned())
            .with_auth_options(AuthOptions::from(&self.options));
        info!(
            "Built host '{}' ({}) in plugin pid {:?}",
            host.name,
            host.driver_name,
            handle.pid()
        );
        Ok(host)
    }

    async fn close(&self) -> Result<()> {
        let live: Vec<Arc<PluginHandle>> = self
            .plugins
            .lock()
            .drain(..)
            .filter_map(|p| p.upgrade())
            .collect();

        if !live.is_empty() {
            info!("Closing {} plugin(s)", live.len());
        }
        for handle in live {
            handle.close().await;
        }
        Ok(())
    }

    fn client_type(&self) -> ClientType {
        ClientType::Rpc
    }
}

/// Pick the executable to re-invoke in plugin mode.
///
/// An explicit override wins. Otherwise a binary that hosts the drivers
/// re-executes itself, and anything else looks for a standalone
/// `machina-driver-<name>` on `path`.
fn locate_plugin(
    driver_name: &str,
    configured: Option<&Path>,
    hosts_drivers: bool,
    path: Option<OsString>,
) -> io::Result<PathBuf> {
    if let Some(binary) = configured {
        return Ok(binary.to_path_buf());
    }
    if hosts_drivers {
        return std::env::current_exe();
    }

    let file_name = format!("{}{}", PLUGIN_BINARY_PREFIX, driver_name);
    if let Some(path) = path {
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    warn!("No plugin executable found for driver '{}'", driver_name);
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found on PATH", file_name),
    ))
}

fn remote_config_error(driver_name: &str, err: DriverError) -> MachineError {
    match err {
        DriverError::InvalidConfig(reason) => MachineError::InvalidConfig {
            driver: driver_name.to_string(),
            reason,
        },
        other => MachineError::RemoteDriver(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverErrorKind;

    #[test]
    fn configured_binary_wins() {
        let path = locate_plugin(
            "virtualbox",
            Some(Path::new("/opt/machina/bin/machina")),
            true,
            None,
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/opt/machina/bin/machina"));
    }

    #[test]
    fn host_binary_reexecutes_itself() {
        let path = locate_plugin("virtualbox", None, true, None).unwrap();
        assert_eq!(path, std::env::current_exe().unwrap());
    }

    #[test]
    fn searches_path_for_standalone_plugin() {
        let empty = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let plugin = bin.path().join("machina-driver-kvm2");
        std::fs::write(&plugin, b"").unwrap();

        let path = std::env::join_paths([empty.path(), bin.path()]).unwrap();
        let found = locate_plugin("kvm2", None, false, Some(path.clone())).unwrap();
        assert_eq!(found, plugin);

        let err = locate_plugin("hyperkit", None, false, Some(path)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(locate_plugin("kvm2", None, false, None).is_err());
    }

    #[test]
    fn remote_config_errors_keep_their_kind() {
        let err = remote_config_error("virtualbox", DriverError::InvalidConfig("eof".into()));
        assert!(matches!(err, MachineError::InvalidConfig { .. }));

        let err = remote_config_error("virtualbox", DriverError::Disconnected("eof".into()));
        match err {
            MachineError::RemoteDriver(inner) => {
                assert_eq!(inner.kind(), DriverErrorKind::Disconnected)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_plugin_binary_fails_launch() {
        let options = ClientOptions::default().plugin_binary("/nonexistent/machina");
        let client = RpcClient::new(options);

        let err = client.new_host("virtualbox", b"{}").await.unwrap_err();
        assert!(matches!(err, MachineError::PluginLaunchFailed { .. }));
        assert_eq!(client.live_plugins(), 0);
        client.close().await.unwrap();
    }
}
