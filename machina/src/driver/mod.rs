//! Hypervisor driver contract, registry and built-in drivers.

mod base;
mod deserialize;
pub mod none;
mod registry;
pub mod virtualbox;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use base::BaseDriver;
pub use deserialize::resolve;
pub use machina_protocol::{DriverErrorKind, MachineState};
pub use none::NoneDriver;
pub use registry::{DriverFactory, DriverRegistry, default_registry};
pub use virtualbox::VirtualBoxDriver;

/// Failure of a single driver operation.
///
/// The variant survives the plugin RPC boundary: the plugin sends
/// [`DriverError::kind`] and [`DriverError::detail`], and the parent rebuilds
/// the same variant with [`DriverError::from_kind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("invalid machine state: {0}")]
    InvalidState(String),

    #[error("hypervisor command failed: {0}")]
    Command(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("plugin connection lost: {0}")]
    Disconnected(String),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn kind(&self) -> DriverErrorKind {
        match self {
            DriverError::InvalidConfig(_) => DriverErrorKind::InvalidConfig,
            DriverError::NotSupported(_) => DriverErrorKind::NotSupported,
            DriverError::InvalidState(_) => DriverErrorKind::InvalidState,
            DriverError::Command(_) => DriverErrorKind::Command,
            DriverError::Io(_) => DriverErrorKind::Io,
            DriverError::Disconnected(_) => DriverErrorKind::Disconnected,
            DriverError::Other(_) => DriverErrorKind::Other,
        }
    }

    /// The message without the kind prefix added by `Display`.
    pub fn detail(&self) -> &str {
        match self {
            DriverError::InvalidConfig(s)
            | DriverError::NotSupported(s)
            | DriverError::InvalidState(s)
            | DriverError::Command(s)
            | DriverError::Io(s)
            | DriverError::Disconnected(s)
            | DriverError::Other(s) => s,
        }
    }

    pub fn from_kind(kind: DriverErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            DriverErrorKind::InvalidConfig => DriverError::InvalidConfig(detail),
            DriverErrorKind::NotSupported => DriverError::NotSupported(detail),
            DriverErrorKind::InvalidState => DriverError::InvalidState(detail),
            DriverErrorKind::Command => DriverError::Command(detail),
            DriverErrorKind::Io => DriverError::Io(detail),
            DriverErrorKind::Disconnected => DriverError::Disconnected(detail),
            DriverErrorKind::Other => DriverError::Other(detail),
        }
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Io(err.to_string())
    }
}

/// A hypervisor driver managing exactly one virtual machine.
///
/// `driver_name` and `machine_name` are synchronous so a host can check its
/// invariants without a round trip; remote proxies cache them after
/// configuration.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry key of this driver, e.g. `"virtualbox"`.
    fn driver_name(&self) -> String;

    fn machine_name(&self) -> String;

    /// Whether operations execute in another process.
    fn is_remote(&self) -> bool {
        false
    }

    /// Replace the driver's persisted fields with the decoded `raw` bytes.
    ///
    /// Must not modify the driver when decoding fails.
    async fn set_config_raw(&mut self, raw: &[u8]) -> Result<(), DriverError>;

    async fn get_config_raw(&self) -> Result<Vec<u8>, DriverError>;

    async fn ip(&self) -> Result<String, DriverError>;

    async fn ssh_hostname(&self) -> Result<String, DriverError> {
        self.ip().await
    }

    async fn ssh_port(&self) -> Result<u16, DriverError>;

    async fn ssh_username(&self) -> Result<String, DriverError>;

    async fn ssh_key_path(&self) -> Result<String, DriverError>;

    async fn url(&self) -> Result<String, DriverError> {
        let ip = self.ip().await?;
        if ip.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("tcp://{}:2376", ip))
    }

    async fn state(&self) -> Result<MachineState, DriverError>;

    async fn pre_create_check(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn create(&mut self) -> Result<(), DriverError>;

    async fn start(&mut self) -> Result<(), DriverError>;

    async fn stop(&mut self) -> Result<(), DriverError>;

    async fn restart(&mut self) -> Result<(), DriverError> {
        self.stop().await?;
        self.start().await
    }

    async fn kill(&mut self) -> Result<(), DriverError>;

    async fn remove(&mut self) -> Result<(), DriverError>;
}

/// Decode a raw driver configuration into a fresh value of `T`.
pub fn decode_config<T: DeserializeOwned>(raw: &[u8]) -> Result<T, DriverError> {
    serde_json::from_slice(raw).map_err(|e| DriverError::InvalidConfig(e.to_string()))
}

/// Encode a driver's persisted fields.
pub fn encode_config<T: serde::Serialize>(driver: &T) -> Result<Vec<u8>, DriverError> {
    serde_json::to_vec(driver).map_err(|e| DriverError::Other(e.to_string()))
}
