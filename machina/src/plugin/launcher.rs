//! Startup mode detection and the plugin entry point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWrite;
use tracing::{info, warn};

use super::server::{DEFAULT_ACCEPT_TIMEOUT, PluginServer};
use super::{PLUGIN_ENV_ACCEPT_TIMEOUT, PLUGIN_ENV_DRIVER_NAME, PLUGIN_ENV_KEY, PLUGIN_ENV_VAL};
use crate::driver::{DriverRegistry, default_registry};

static CURRENT_BINARY_HOSTS_DRIVERS: AtomicBool = AtomicBool::new(false);
static IS_PLUGIN_PROCESS: AtomicBool = AtomicBool::new(false);

/// Whether this binary can be re-executed to serve its own drivers.
///
/// Set when [`Launcher::run`] finishes in [`StartupMode::Normal`]; RPC clients
/// then re-invoke the current executable instead of searching `PATH`.
pub fn current_binary_hosts_drivers() -> bool {
    CURRENT_BINARY_HOSTS_DRIVERS.load(Ordering::SeqCst)
}

/// Whether this process entered plugin mode
pub fn is_plugin_process() -> bool {
    IS_PLUGIN_PROCESS.load(Ordering::SeqCst)
}

/// How the process was asked to run, decided once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupMode {
    Normal,
    PluginServer {
        driver_name: String,
        accept_timeout: Duration,
    },
}

impl StartupMode {
    /// Decide the mode from an environment lookup
    pub fn detect<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup(PLUGIN_ENV_KEY).as_deref() != Some(PLUGIN_ENV_VAL) {
            return StartupMode::Normal;
        }

        let driver_name = lookup(PLUGIN_ENV_DRIVER_NAME).unwrap_or_default();
        let accept_timeout = lookup(PLUGIN_ENV_ACCEPT_TIMEOUT)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ACCEPT_TIMEOUT);

        StartupMode::PluginServer {
            driver_name,
            accept_timeout,
        }
    }

    /// Decide the mode from the process environment
    pub fn from_env() -> Self {
        Self::detect(|key| std::env::var(key).ok())
    }

    pub fn is_plugin(&self) -> bool {
        matches!(self, StartupMode::PluginServer { .. })
    }
}

/// What the caller should do after [`Launcher::run`] returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// Continue with normal program logic
    RunCli,
    /// The plugin server finished; the process should exit
    PluginFinished,
}

/// Turns the process into either a normal program or a driver plugin
pub struct Launcher {
    mode: StartupMode,
    registry: Arc<DriverRegistry>,
}

impl Launcher {
    pub fn new(mode: StartupMode, registry: Arc<DriverRegistry>) -> Self {
        Self { mode, registry }
    }

    /// Launcher for the process environment and the built-in drivers
    pub fn from_env() -> Self {
        Self::new(StartupMode::from_env(), default_registry())
    }

    pub fn mode(&self) -> &StartupMode {
        &self.mode
    }

    /// Run with the address line written to the process's stdout
    pub async fn run(self) -> Result<Startup> {
        self.run_with_output(tokio::io::stdout()).await
    }

    /// Run, writing the plugin address line to `out`
    ///
    /// In plugin mode this blocks until the parent closes or disconnects.
    /// An unregistered driver name is an error the caller should treat as
    /// fatal.
    pub async fn run_with_output<W>(self, mut out: W) -> Result<Startup>
    where
        W: AsyncWrite + Unpin,
    {
        let (driver_name, accept_timeout) = match self.mode {
            StartupMode::Normal => {
                CURRENT_BINARY_HOSTS_DRIVERS.store(true, Ordering::SeqCst);
                return Ok(Startup::RunCli);
            }
            StartupMode::PluginServer {
                driver_name,
                accept_timeout,
            } => (driver_name, accept_timeout),
        };

        IS_PLUGIN_PROCESS.store(true, Ordering::SeqCst);

        let driver = self.registry.new_driver(&driver_name)?;

        let server = PluginServer::bind(driver)
            .await
            .context("Failed to bind plugin listener")?
            .with_accept_timeout(accept_timeout);

        // The address line must be out before anyone can dial.
        server
            .announce(&mut out)
            .await
            .context("Failed to announce plugin address")?;
        info!(
            "Plugin for driver '{}' listening on {}",
            driver_name,
            server.local_addr()?
        );

        match server.serve().await {
            Ok(exit) => {
                info!("Plugin for driver '{}' finished: {:?}", driver_name, exit);
                Ok(Startup::PluginFinished)
            }
            Err(e) => {
                warn!("Plugin for driver '{}' failed: {}", driver_name, e);
                Err(e).context("Plugin server failed")
            }
        }
    }
}

/// Run the launcher for the current process environment
pub async fn start_driver() -> Result<Startup> {
    Launcher::from_env().run().await
}
