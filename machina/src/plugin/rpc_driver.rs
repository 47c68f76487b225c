//! A [`Driver`] whose every operation runs inside a plugin process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use machina_protocol::{
    Ack, ConfigRawResult, MachineState, PortResult, SetConfigRawParams, StateResult,
    StringResult, methods,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::connection::RpcConnection;
use super::process::PluginProcess;
use crate::core::ClientOptions;
use crate::driver::{Driver, DriverError};
use crate::error::{MachineError, Result};

/// Ownership of one running plugin: its connection and its process.
pub struct PluginHandle {
    conn: RpcConnection,
    process: Mutex<Option<PluginProcess>>,
    driver_name: String,
    pid: Option<u32>,
    shutdown_timeout: Duration,
}

impl PluginHandle {
    /// Start a plugin for `driver_name` from `binary` and confirm it serves
    /// that driver.
    pub async fn launch(binary: &Path, driver_name: &str, options: &ClientOptions) -> Result<Self> {
        let (process, stream) =
            PluginProcess::launch(binary, driver_name, options.handshake_timeout()).await?;

        let handle = Self {
            conn: RpcConnection::new(stream, options.rpc_timeout()),
            pid: process.id(),
            process: Mutex::new(Some(process)),
            driver_name: driver_name.to_string(),
            shutdown_timeout: options.shutdown_timeout(),
        };

        let reason = match handle.confirm(driver_name).await {
            Ok(()) => return Ok(handle),
            Err(reason) => reason,
        };
        handle.close().await;
        Err(MachineError::handshake(driver_name, reason))
    }

    async fn confirm(&self, driver_name: &str) -> std::result::Result<(), String> {
        self.conn.heartbeat().await.map_err(|e| e.to_string())?;
        let served: StringResult = self
            .conn
            .call_typed(methods::DRIVER_NAME, &Value::Null)
            .await
            .map_err(|e| e.to_string())?;
        if served.value != driver_name {
            return Err(format!("plugin serves '{}'", served.value));
        }
        Ok(())
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn connection(&self) -> &RpcConnection {
        &self.conn
    }

    /// Ask the plugin to exit and reap it. Safe to call more than once.
    pub async fn close(&self) {
        let Some(process) = self.process.lock().await.take() else {
            return;
        };

        if let Err(e) = self.conn.call(methods::CLOSE, Value::Null).await {
            debug!("Close for plugin '{}' failed: {}", self.driver_name, e);
        }
        process.shutdown(self.shutdown_timeout).await;
        info!("Plugin for driver '{}' closed", self.driver_name);
    }

    pub async fn is_closed(&self) -> bool {
        self.process.lock().await.is_none()
    }
}

/// Reject a configuration too large to cross the plugin connection.
fn check_config_len(raw: &[u8]) -> std::result::Result<(), DriverError> {
    if raw.len() > SetConfigRawParams::MAX_RAW_LEN {
        return Err(DriverError::InvalidConfig(format!(
            "configuration is {} bytes, at most {} can be sent to a plugin",
            raw.len(),
            SetConfigRawParams::MAX_RAW_LEN
        )));
    }
    Ok(())
}

/// Proxy forwarding the [`Driver`] contract over a plugin connection.
///
/// `driver_name` and `machine_name` are cached locally; the machine name is
/// refreshed whenever the configuration changes.
pub struct RpcDriver {
    handle: Arc<PluginHandle>,
    driver_name: String,
    machine_name: String,
}

impl RpcDriver {
    pub fn new(handle: Arc<PluginHandle>) -> Self {
        Self {
            driver_name: handle.driver_name().to_string(),
            machine_name: String::new(),
            handle,
        }
    }

    pub fn handle(&self) -> &Arc<PluginHandle> {
        &self.handle
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    pub async fn close(&self) {
        self.handle.close().await;
    }

    /// Check the plugin still answers.
    pub async fn heartbeat(&self) -> std::result::Result<(), DriverError> {
        self.handle.conn.heartbeat().await
    }

    async fn string(&self, method: &str) -> std::result::Result<String, DriverError> {
        let result: StringResult = self.handle.conn.call_typed(method, &Value::Null).await?;
        Ok(result.value)
    }

    async fn ack(&self, method: &str) -> std::result::Result<(), DriverError> {
        let _: Ack = self.handle.conn.call_typed(method, &Value::Null).await?;
        Ok(())
    }
}

#[async_trait]
impl Driver for RpcDriver {
    fn driver_name(&self) -> String {
        self.driver_name.clone()
    }

    fn machine_name(&self) -> String {
        self.machine_name.clone()
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn set_config_raw(&mut self, raw: &[u8]) -> std::result::Result<(), DriverError> {
        check_config_len(raw)?;
        let params = SetConfigRawParams { raw: raw.to_vec() };
        let _: Ack = self
            .handle
            .conn
            .call_typed(methods::SET_CONFIG_RAW, &params)
            .await?;
        self.machine_name = self.string(methods::MACHINE_NAME).await?;
        Ok(())
    }

    async fn get_config_raw(&self) -> std::result::Result<Vec<u8>, DriverError> {
        let result: ConfigRawResult = self
            .handle
            .conn
            .call_typed(methods::GET_CONFIG_RAW, &Value::Null)
            .await?;
        Ok(result.raw)
    }

    async fn ip(&self) -> std::result::Result<String, DriverError> {
        self.string(methods::GET_IP).await
    }

    async fn ssh_hostname(&self) -> std::result::Result<String, DriverError> {
        self.string(methods::GET_SSH_HOSTNAME).await
    }

    async fn ssh_port(&self) -> std::result::Result<u16, DriverError> {
        let result: PortResult = self
            .handle
            .conn
            .call_typed(methods::GET_SSH_PORT, &Value::Null)
            .await?;
        Ok(result.port)
    }

    async fn ssh_username(&self) -> std::result::Result<String, DriverError> {
        self.string(methods::GET_SSH_USERNAME).await
    }

    async fn ssh_key_path(&self) -> std::result::Result<String, DriverError> {
        self.string(methods::GET_SSH_KEY_PATH).await
    }

    async fn url(&self) -> std::result::Result<String, DriverError> {
        self.string(methods::GET_URL).await
    }

    async fn state(&self) -> std::result::Result<MachineState, DriverError> {
        let result: StateResult = self
            .handle
            .conn
            .call_typed(methods::GET_STATE, &Value::Null)
            .await?;
        Ok(result.state)
    }

    async fn pre_create_check(&self) -> std::result::Result<(), DriverError> {
        self.ack(methods::PRE_CREATE_CHECK).await
    }

    async fn create(&mut self) -> std::result::Result<(), DriverError> {
        self.ack(methods::CREATE).await
    }

    async fn start(&mut self) -> std::result::Result<(), DriverError> {
        self.ack(methods::START).await
    }

    async fn stop(&mut self) -> std::result::Result<(), DriverError> {
        self.ack(methods::STOP).await
    }

    async fn restart(&mut self) -> std::result::Result<(), DriverError> {
        self.ack(methods::RESTART).await
    }

    async fn kill(&mut self) -> std::result::Result<(), DriverError> {
        self.ack(methods::KILL).await
    }

    async fn remove(&mut self) -> std::result::Result<(), DriverError> {
        self.ack(methods::REMOVE).await
    }
}
