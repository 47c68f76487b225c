//! API clients: the entry point callers use to build hosts.
//!
//! A [`LocalClient`] resolves drivers in the current process. An
//! [`RpcClient`] runs each driver in its own plugin process and talks to it
//! over loopback RPC. Both hand back the same [`Host`].

mod local;
mod rpc;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalClient;
pub use rpc::RpcClient;

use crate::core::{ClientOptions, ConfigStore, Host};
use crate::error::{MachineError, Result};

/// Which client variant to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Local = 0,
    Rpc = 1,
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientType::Local => write!(f, "local"),
            ClientType::Rpc => write!(f, "rpc"),
        }
    }
}

impl TryFrom<i32> for ClientType {
    type Error = MachineError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(ClientType::Local),
            1 => Ok(ClientType::Rpc),
            other => Err(MachineError::UnknownClientType(other.to_string())),
        }
    }
}

impl FromStr for ClientType {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ClientType::Local),
            "rpc" => Ok(ClientType::Rpc),
            _ => Err(MachineError::UnknownClientType(format!("{:?}", s))),
        }
    }
}

impl TryFrom<&str> for ClientType {
    type Error = MachineError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

/// Builds hosts from a driver name and its raw configuration.
#[async_trait]
pub trait Client: Send + Sync {
    /// Construct a host whose driver is resolved and configured.
    ///
    /// On failure no host exists and any plugin started for it is gone.
    async fn new_host(&self, driver_name: &str, raw_driver: &[u8]) -> Result<Host>;

    /// Release resources held on behalf of hosts built by this client.
    async fn close(&self) -> Result<()>;

    fn client_type(&self) -> ClientType;
}

/// Creates clients of one [`ClientType`]
pub trait ClientFactory: Send + Sync {
    fn new_client(&self, options: ClientOptions) -> Box<dyn Client>;
}

pub struct LocalClientFactory;

impl ClientFactory for LocalClientFactory {
    fn new_client(&self, options: ClientOptions) -> Box<dyn Client> {
        Box::new(LocalClient::new(options))
    }
}

pub struct RpcClientFactory;

impl ClientFactory for RpcClientFactory {
    fn new_client(&self, options: ClientOptions) -> Box<dyn Client> {
        Box::new(RpcClient::new(options))
    }
}

/// The factory for `client_type`
pub fn client_factory(client_type: ClientType) -> &'static dyn ClientFactory {
    match client_type {
        ClientType::Local => &LocalClientFactory,
        ClientType::Rpc => &RpcClientFactory,
    }
}

/// Build a client with default options.
///
/// Accepts a [`ClientType`] or anything convertible into one; values outside
/// the known variants fail with [`MachineError::UnknownClientType`].
pub fn new_api_client<C>(client_type: C) -> Result<Box<dyn Client>>
where
    C: TryInto<ClientType>,
    MachineError: From<C::Error>,
{
    new_api_client_with(client_type, ClientOptions::default())
}

/// Build a client with explicit options. `client_type` overrides
/// `options.client_type`.
pub fn new_api_client_with<C>(client_type: C, mut options: ClientOptions) -> Result<Box<dyn Client>>
where
    C: TryInto<ClientType>,
    MachineError: From<C::Error>,
{
    let client_type = client_type.try_into()?;
    options.client_type = client_type;
    Ok(client_factory(client_type).new_client(options))
}

/// Build the client described by the `[client]` section of `store`.
pub fn new_api_client_from_config(store: &ConfigStore) -> Result<Box<dyn Client>> {
    let options: ClientOptions = store.get()?;
    new_api_client_with(options.client_type, options)
}
