//! Caller-facing handle binding a machine to its driver.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use super::ClientOptions;
use crate::driver::{Driver, DriverError, MachineState};
use crate::error::{MachineError, Result};

/// Where a host's store and TLS material live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOptions {
    pub store_path: PathBuf,
    pub certs_dir: PathBuf,
}

impl AuthOptions {
    pub fn new(store_path: impl Into<PathBuf>, certs_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            certs_dir: certs_dir.into(),
        }
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.certs_dir.join("ca.pem")
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.certs_dir.join("ca-key.pem")
    }

    pub fn client_cert_path(&self) -> PathBuf {
        self.certs_dir.join("cert.pem")
    }

    pub fn client_key_path(&self) -> PathBuf {
        self.certs_dir.join("key.pem")
    }

    pub fn machine_dir(&self, machine: &str) -> PathBuf {
        self.store_path.join("machines").join(machine)
    }
}

impl From<&ClientOptions> for AuthOptions {
    fn from(options: &ClientOptions) -> Self {
        Self::new(&options.store_path, &options.certs_dir)
    }
}

/// Fill a missing or empty `StorePath` in a driver configuration.
///
/// Bytes that are not a JSON object pass through untouched so the driver
/// still reports them as invalid.
pub fn with_store_path<'a>(raw: &'a [u8], store_path: &Path) -> Cow<'a, [u8]> {
    if store_path.as_os_str().is_empty() {
        return Cow::Borrowed(raw);
    }
    let Ok(mut fields) = serde_json::from_slice::<serde_json::Map<String, Value>>(raw) else {
        return Cow::Borrowed(raw);
    };
    match fields.get(STORE_PATH_FIELD) {
        Some(Value::String(existing)) if !existing.is_empty() => return Cow::Borrowed(raw),
        Some(Value::String(_)) | None => {}
        // Wrong type; leave it for the driver to reject
        Some(_) => return Cow::Borrowed(raw),
    }
    fields.insert(
        STORE_PATH_FIELD.to_string(),
        Value::String(store_path.to_string_lossy().into_owned()),
    );
    match serde_json::to_vec(&fields) {
        Ok(patched) => Cow::Owned(patched),
        Err(_) => Cow::Borrowed(raw),
    }
}

const STORE_PATH_FIELD: &str = "StorePath";

/// A machine and the driver that manages it.
///
/// Always holds a configured driver; `name` and `driver_name` are taken from
/// that driver when the host is built.
pub struct Host {
    pub name: String,
    pub driver_name: String,
    /// Configuration bytes the driver was built from
    pub raw_driver: Vec<u8>,
    pub driver: Box<dyn Driver>,
    pub auth_options: AuthOptions,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("driver_name", &self.driver_name)
            .field("auth_options", &self.auth_options)
            .finish_non_exhaustive()
    }
}

impl Host {
    pub fn new(driver: Box<dyn Driver>, raw_driver: Vec<u8>) -> Self {
        Self {
            name: driver.machine_name(),
            driver_name: driver.driver_name(),
            raw_driver,
            driver,
            auth_options: AuthOptions::from(&ClientOptions::default()),
        }
    }

    pub fn with_auth_options(mut self, auth_options: AuthOptions) -> Self {
        self.auth_options = auth_options;
        self
    }

    /// Directory holding this machine's files in the store.
    pub fn machine_dir(&self) -> PathBuf {
        self.auth_options.machine_dir(&self.name)
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub async fn state(&self) -> Result<MachineState> {
        self.driver.state().await.map_err(|e| self.fail(e))
    }

    pub async fn ip(&self) -> Result<String> {
        self.driver.ip().await.map_err(|e| self.fail(e))
    }

    pub async fn url(&self) -> Result<String> {
        self.driver.url().await.map_err(|e| self.fail(e))
    }

    pub async fn create(&mut self) -> Result<()> {
        info!("Creating machine {} ({})", self.name, self.driver_name);
        self.driver.pre_create_check().await.map_err(|e| self.fail(e))?;
        self.driver.create().await.map_err(|e| self.fail(e))?;
        self.refresh_raw_driver().await
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Starting machine {}", self.name);
        self.driver.start().await.map_err(|e| self.fail(e))?;
        self.refresh_raw_driver().await
    }

    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping machine {}", self.name);
        self.driver.stop().await.map_err(|e| self.fail(e))?;
        self.refresh_raw_driver().await
    }

    pub async fn restart(&mut self) -> Result<()> {
        info!("Restarting machine {}", self.name);
        self.driver.restart().await.map_err(|e| self.fail(e))?;
        self.refresh_raw_driver().await
    }

    pub async fn kill(&mut self) -> Result<()> {
        info!("Killing machine {}", self.name);
        self.driver.kill().await.map_err(|e| self.fail(e))?;
        self.refresh_raw_driver().await
    }

    pub async fn remove(&mut self) -> Result<()> {
        info!("Removing machine {}", self.name);
        self.driver.remove().await.map_err(|e| self.fail(e))?;
        Ok(())
    }

    /// Re-read the driver's persisted fields after a state-changing operation.
    async fn refresh_raw_driver(&mut self) -> Result<()> {
        self.raw_driver = self.driver.get_config_raw().await.map_err(|e| self.fail(e))?;
        Ok(())
    }

    fn fail(&self, err: DriverError) -> MachineError {
        if self.driver.is_remote() {
            MachineError::RemoteDriver(err)
        } else {
            MachineError::Driver(err)
        }
    }
}
