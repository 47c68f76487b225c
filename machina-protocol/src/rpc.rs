//! JSON-RPC message types

use serde::{Deserialize, Serialize};

use crate::JSONRPC_VERSION;

/// JSON-RPC Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: u64,
}

impl RpcRequest {
    /// Create a new RPC request
    pub fn new(method: impl Into<String>, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: u64,
}

impl RpcResponse {
    /// Create a success response
    pub fn success(result: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response
    pub fn error(error: RpcError, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data to the error
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Standard error: Parse error
    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    /// Standard error: Invalid request
    pub fn invalid_request() -> Self {
        Self::new(codes::INVALID_REQUEST, "Invalid Request")
    }

    /// Standard error: Method not found
    pub fn method_not_found() -> Self {
        Self::new(codes::METHOD_NOT_FOUND, "Method not found")
    }

    /// Standard error: Invalid params
    pub fn invalid_params() -> Self {
        Self::new(codes::INVALID_PARAMS, "Invalid params")
    }

    /// Standard error: Internal error
    pub fn internal_error() -> Self {
        Self::new(codes::INTERNAL_ERROR, "Internal error")
    }
}

/// Error codes carried in [`RpcError::code`]
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Raw driver configuration could not be decoded
    pub const INVALID_CONFIG: i32 = -32002;
    /// A driver operation failed; `data` carries the error kind
    pub const DRIVER_ERROR: i32 = -32010;
}

/// RPC Method names
pub mod methods {
    pub const SET_CONFIG_RAW: &str = "set_config_raw";
    pub const GET_CONFIG_RAW: &str = "get_config_raw";
    pub const DRIVER_NAME: &str = "driver_name";
    pub const MACHINE_NAME: &str = "machine_name";
    pub const GET_IP: &str = "get_ip";
    pub const GET_SSH_HOSTNAME: &str = "get_ssh_hostname";
    pub const GET_SSH_PORT: &str = "get_ssh_port";
    pub const GET_SSH_USERNAME: &str = "get_ssh_username";
    pub const GET_SSH_KEY_PATH: &str = "get_ssh_key_path";
    pub const GET_URL: &str = "get_url";
    pub const GET_STATE: &str = "get_state";
    pub const PRE_CREATE_CHECK: &str = "pre_create_check";
    pub const CREATE: &str = "create";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const RESTART: &str = "restart";
    pub const KILL: &str = "kill";
    pub const REMOVE: &str = "remove";
    /// Liveness check, answered with the plugin's protocol version
    pub const HEARTBEAT: &str = "heartbeat";
    /// Acknowledged, then the plugin stops serving and exits
    pub const CLOSE: &str = "close";
}
