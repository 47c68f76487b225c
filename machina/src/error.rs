//! Error types returned by client and host construction.

use std::convert::Infallible;

use thiserror::Error;

use crate::driver::DriverError;

pub type Result<T> = std::result::Result<T, MachineError>;

/// Failures surfaced to callers of `new_api_client` and `Client::new_host`.
///
/// Every variant is distinct so callers can tell "unknown driver" apart from
/// "malformed configuration" without string matching.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("unknown driver '{0}'")]
    UnknownDriver(String),

    #[error("invalid configuration for driver '{driver}': {reason}")]
    InvalidConfig { driver: String, reason: String },

    #[error("unknown client type {0}")]
    UnknownClientType(String),

    #[error("failed to launch plugin for driver '{driver}': {source}")]
    PluginLaunchFailed {
        driver: String,
        #[source]
        source: std::io::Error,
    },

    #[error("plugin handshake failed for driver '{driver}': {reason}")]
    PluginHandshakeFailed { driver: String, reason: String },

    #[error("remote driver error: {0}")]
    RemoteDriver(#[source] DriverError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl MachineError {
    /// Short stable name of the error kind, suitable for CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            MachineError::UnknownDriver(_) => "UnknownDriver",
            MachineError::InvalidConfig { .. } => "InvalidConfig",
            MachineError::UnknownClientType(_) => "UnknownClientType",
            MachineError::PluginLaunchFailed { .. } => "PluginLaunchFailed",
            MachineError::PluginHandshakeFailed { .. } => "PluginHandshakeFailed",
            MachineError::RemoteDriver(_) => "RemoteDriverError",
            MachineError::Driver(_) => "DriverError",
            MachineError::Config(_) => "ConfigError",
        }
    }

    pub(crate) fn handshake(driver: &str, reason: impl Into<String>) -> Self {
        MachineError::PluginHandshakeFailed {
            driver: driver.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<Infallible> for MachineError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let unknown = MachineError::UnknownDriver("kvm".into());
        let invalid = MachineError::InvalidConfig {
            driver: "virtualbox".into(),
            reason: "expected value".into(),
        };
        assert_ne!(unknown.kind(), invalid.kind());
        assert_eq!(unknown.to_string(), "unknown driver 'kvm'");
    }

    #[test]
    fn remote_error_keeps_source() {
        use std::error::Error as _;

        let err = MachineError::RemoteDriver(DriverError::NotSupported("kill".into()));
        assert_eq!(err.kind(), "RemoteDriverError");
        assert!(err.source().is_some());
    }
}
