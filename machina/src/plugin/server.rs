//! Loopback RPC server hosting a single driver.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use machina_protocol::{
    Ack, ConfigRawResult, DriverErrorData, HeartbeatResult, JSONRPC_VERSION, PortResult,
    RpcError, RpcRequest, RpcResponse, SetConfigRawParams, StateResult, StringResult, codes,
    methods,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::wire::{encode_message, read_message, write_line, write_message};
use crate::driver::{Driver, DriverError, DriverErrorKind};

/// How long a plugin waits for its parent to dial before giving up
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why [`PluginServer::serve`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// The parent asked the plugin to close
    Closed,
    /// The parent connection reached EOF
    Disconnected,
}

/// Serves one driver to exactly one connection.
///
/// Requests are handled strictly one after another while holding the driver
/// lock; hypervisor tools are not safe to drive concurrently for one VM.
pub struct PluginServer {
    listener: TcpListener,
    driver: Mutex<Box<dyn Driver>>,
    accept_timeout: Duration,
}

impl PluginServer {
    /// Bind an OS-assigned port on the IPv4 loopback interface
    pub async fn bind(driver: Box<dyn Driver>) -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?;
        Ok(Self {
            listener,
            driver: Mutex::new(driver),
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        })
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Write the `host:port` line the parent is waiting for.
    pub async fn announce<W>(&self, out: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let addr = self.local_addr()?;
        out.write_all(format!("{}\n", addr).as_bytes()).await?;
        out.flush().await
    }

    /// Accept the parent's connection and serve it until close or EOF.
    pub async fn serve(self) -> io::Result<ServeExit> {
        let (stream, peer) = tokio::time::timeout(self.accept_timeout, self.listener.accept())
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection within {:?}", self.accept_timeout),
                )
            })??;

        // Only the parent is served; stop listening for anyone else.
        drop(self.listener);
        info!("Plugin accepted connection from {}", peer);

        Self::serve_connection(&self.driver, stream).await
    }

    async fn serve_connection(
        driver: &Mutex<Box<dyn Driver>>,
        stream: TcpStream,
    ) -> io::Result<ServeExit> {
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            if !read_message(&mut reader, &mut line).await? {
                info!("Parent disconnected, plugin shutting down");
                return Ok(ServeExit::Disconnected);
            }

            let (response, close) = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) if request.jsonrpc != JSONRPC_VERSION => {
                    warn!("Plugin received jsonrpc {:?} request", request.jsonrpc);
                    (RpcResponse::error(RpcError::invalid_request(), request.id), false)
                }
                Ok(request) => {
                    debug!("Plugin handling {} (id {})", request.method, request.id);
                    let close = request.method == methods::CLOSE;
                    let response = match dispatch(driver, &request).await {
                        Ok(result) => RpcResponse::success(result, request.id),
                        Err(error) => RpcResponse::error(error, request.id),
                    };
                    (response, close)
                }
                Err(e) => {
                    warn!("Plugin received malformed request: {}", e);
                    (RpcResponse::error(RpcError::parse_error(), 0), false)
                }
            };

            match encode_message(&response) {
                Ok(encoded) => write_line(&mut writer, &encoded).await?,
                Err(e) => {
                    warn!("Plugin response to id {} not sendable: {}", response.id, e);
                    let fallback = RpcResponse::error(RpcError::internal_error(), response.id);
                    write_message(&mut writer, &fallback).await?;
                }
            }

            if close {
                info!("Plugin received close, shutting down");
                return Ok(ServeExit::Closed);
            }
        }
    }
}

async fn dispatch(
    driver: &Mutex<Box<dyn Driver>>,
    request: &RpcRequest,
) -> Result<serde_json::Value, RpcError> {
    let mut driver = driver.lock().await;

    match request.method.as_str() {
        methods::SET_CONFIG_RAW => {
            let params: SetConfigRawParams = params(request)?;
            driver
                .set_config_raw(&params.raw)
                .await
                .map_err(driver_error)?;
            to_result(Ack::ok())
        }
        methods::GET_CONFIG_RAW => {
            let raw = driver.get_config_raw().await.map_err(driver_error)?;
            to_result(ConfigRawResult { raw })
        }
        methods::DRIVER_NAME => to_result(StringResult {
            value: driver.driver_name(),
        }),
        methods::MACHINE_NAME => to_result(StringResult {
            value: driver.machine_name(),
        }),
        methods::GET_IP => string_result(driver.ip().await),
        methods::GET_SSH_HOSTNAME => string_result(driver.ssh_hostname().await),
        methods::GET_SSH_USERNAME => string_result(driver.ssh_username().await),
        methods::GET_SSH_KEY_PATH => string_result(driver.ssh_key_path().await),
        methods::GET_URL => string_result(driver.url().await),
        methods::GET_SSH_PORT => {
            let port = driver.ssh_port().await.map_err(driver_error)?;
            to_result(PortResult { port })
        }
        methods::GET_STATE => {
            let state = driver.state().await.map_err(driver_error)?;
            to_result(StateResult { state })
        }
        methods::PRE_CREATE_CHECK => ack(driver.pre_create_check().await),
        methods::CREATE => ack(driver.create().await),
        methods::START => ack(driver.start().await),
        methods::STOP => ack(driver.stop().await),
        methods::RESTART => ack(driver.restart().await),
        methods::KILL => ack(driver.kill().await),
        methods::REMOVE => ack(driver.remove().await),
        methods::HEARTBEAT => to_result(HeartbeatResult::current()),
        methods::CLOSE => to_result(Ack::ok()),
        _ => Err(RpcError::method_not_found()),
    }
}

fn params<T: DeserializeOwned>(request: &RpcRequest) -> Result<T, RpcError> {
    serde_json::from_value(request.params.clone()).map_err(|_| RpcError::invalid_params())
}

fn to_result<T: Serialize>(value: T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(value).map_err(|_| RpcError::internal_error())
}

fn string_result(value: Result<String, DriverError>) -> Result<serde_json::Value, RpcError> {
    let value = value.map_err(driver_error)?;
    to_result(StringResult { value })
}

fn ack(result: Result<(), DriverError>) -> Result<serde_json::Value, RpcError> {
    result.map_err(driver_error)?;
    to_result(Ack::ok())
}

/// Encode a driver failure so the parent can rebuild the same kind.
fn driver_error(err: DriverError) -> RpcError {
    let kind = err.kind();
    let code = if kind == DriverErrorKind::InvalidConfig {
        codes::INVALID_CONFIG
    } else {
        codes::DRIVER_ERROR
    };
    let data = serde_json::to_value(DriverErrorData { kind }).unwrap_or_default();
    RpcError::new(code, err.detail()).with_data(data)
}
