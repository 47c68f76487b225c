//! Machina Driver Plugin Protocol
//!
//! This crate defines the JSON-RPC protocol spoken between a controlling
//! process and a driver plugin process hosting exactly one driver.
//!
//! # Protocol Overview
//!
//! The plugin binds `127.0.0.1:0` and prints the resolved `host:port` as the
//! first line of its standard output. The parent dials that address and
//! exchanges newline-delimited JSON-RPC 2.0 messages, one request at a time.
//!
//! ## Methods
//!
//! - `set_config_raw` / `get_config_raw` - Configure or read back the driver
//! - `driver_name` / `machine_name` - Identity of the hosted driver
//! - `get_*` - Connection details (IP, SSH, URL) and machine state
//! - `pre_create_check`, `create`, `start`, `stop`, `restart`, `kill`, `remove`
//! - `heartbeat` - Liveness check reporting the protocol version
//! - `close` - Ask the plugin to shut down

mod rpc;
mod types;

pub use rpc::*;
pub use types::*;

/// Protocol version; parent and plugin must agree on it exactly
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// JSON-RPC version
pub const JSONRPC_VERSION: &str = "2.0";

/// Upper bound on a single encoded message line, in bytes.
pub const MAX_MESSAGE_LEN: usize = 4 * 1024 * 1024;
