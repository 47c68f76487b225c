//! Parent side of the plugin RPC channel.

use std::time::Duration;

use machina_protocol::{
    DriverErrorData, HeartbeatResult, PROTOCOL_VERSION, RpcError, RpcRequest, RpcResponse, codes,
    methods,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::wire::{encode_message, read_message, write_line};
use crate::driver::{DriverError, DriverErrorKind};

struct Channel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
    broken: bool,
}

/// A request/response connection to one plugin.
///
/// Calls are serialized: a call holds the channel from writing its request
/// until its response is read, so ids always line up. After a transport
/// failure or timeout the connection is marked broken and every later call
/// fails with [`DriverErrorKind::Disconnected`].
pub struct RpcConnection {
    channel: Mutex<Channel>,
    call_timeout: Duration,
}

impl RpcConnection {
    pub fn new(stream: TcpStream, call_timeout: Duration) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            channel: Mutex::new(Channel {
                reader: BufReader::new(reader),
                writer,
                next_id: 1,
                broken: false,
            }),
            call_timeout,
        }
    }

    /// Send a request and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, DriverError> {
        let mut channel = self.channel.lock().await;
        if channel.broken {
            return Err(DriverError::Disconnected(format!(
                "connection unusable, cannot call '{}'",
                method
            )));
        }

        let id = channel.next_id;
        channel.next_id += 1;

        // Nothing is sent for a request that cannot be framed
        let request = encode_message(&RpcRequest::new(method, params, id))
            .map_err(|e| DriverError::Other(format!("cannot send '{}': {}", method, e)))?;

        let outcome = timeout(self.call_timeout, exchange(&mut channel, method, &request, id)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(reason)) => {
                channel.broken = true;
                warn!("RPC '{}' failed: {}", method, reason);
                return Err(DriverError::Disconnected(reason));
            }
            Err(_) => {
                channel.broken = true;
                warn!("RPC '{}' timed out after {:?}", method, self.call_timeout);
                return Err(DriverError::Disconnected(format!(
                    "'{}' timed out after {:?}",
                    method, self.call_timeout
                )));
            }
        };
        drop(channel);

        if let Some(error) = response.error {
            return Err(remote_error(error));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// [`call`](Self::call) with typed params and result.
    pub async fn call_typed<P, R>(&self, method: &str, params: &P) -> Result<R, DriverError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| DriverError::Other(format!("encode '{}' params: {}", method, e)))?;
        let result = self.call(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| DriverError::Other(format!("decode '{}' result: {}", method, e)))
    }

    /// Check the plugin is responsive and speaks this protocol version.
    pub async fn heartbeat(&self) -> Result<(), DriverError> {
        let beat: HeartbeatResult = self.call_typed(methods::HEARTBEAT, &Value::Null).await?;
        if beat.protocol_version != PROTOCOL_VERSION {
            return Err(DriverError::Other(format!(
                "plugin speaks protocol {}, expected {}",
                beat.protocol_version, PROTOCOL_VERSION
            )));
        }
        Ok(())
    }

    pub async fn is_broken(&self) -> bool {
        self.channel.lock().await.broken
    }
}

async fn exchange(
    channel: &mut Channel,
    method: &str,
    request: &[u8],
    id: u64,
) -> Result<RpcResponse, String> {
    debug!("Sending RPC '{}' (id {})", method, id);

    write_line(&mut channel.writer, request)
        .await
        .map_err(|e| format!("write '{}': {}", method, e))?;

    let mut line = String::new();
    let got = read_message(&mut channel.reader, &mut line)
        .await
        .map_err(|e| format!("read '{}': {}", method, e))?;
    if !got {
        return Err(format!("plugin closed the connection during '{}'", method));
    }

    let response: RpcResponse =
        serde_json::from_str(&line).map_err(|e| format!("malformed response: {}", e))?;
    if response.id != id {
        return Err(format!(
            "response id mismatch: expected {}, got {}",
            id, response.id
        ));
    }
    Ok(response)
}

/// Rebuild the driver error a plugin reported.
fn remote_error(error: RpcError) -> DriverError {
    match error.code {
        codes::INVALID_CONFIG => DriverError::InvalidConfig(error.message),
        codes::DRIVER_ERROR => {
            let kind = error
                .data
                .and_then(|data| serde_json::from_value::<DriverErrorData>(data).ok())
                .map(|data| data.kind)
                .unwrap_or(DriverErrorKind::Other);
            DriverError::from_kind(kind, error.message)
        }
        code => DriverError::Other(format!("rpc error {}: {}", code, error.message)),
    }
}
