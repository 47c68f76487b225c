//! Driver plugins: hosting one driver per process behind a loopback RPC
//! server, and the parent-side machinery that launches and talks to it.
//!
//! # Handshake
//!
//! The parent re-executes a binary with [`PLUGIN_ENV_KEY`] set to
//! [`PLUGIN_ENV_VAL`] and [`PLUGIN_ENV_DRIVER_NAME`] naming the driver. The
//! child binds `127.0.0.1:0`, prints `host:port` on the first line of stdout,
//! and then serves newline-delimited JSON-RPC on that socket until the parent
//! sends `close` or disconnects.

mod connection;
mod launcher;
mod process;
mod rpc_driver;
mod server;
mod wire;

pub use connection::RpcConnection;
pub use launcher::{
    Launcher, StartupMode, Startup, current_binary_hosts_drivers, is_plugin_process,
    start_driver,
};
pub use process::PluginProcess;
pub use rpc_driver::{PluginHandle, RpcDriver};
pub use server::{PluginServer, ServeExit};

/// Environment variable flagging plugin mode
pub const PLUGIN_ENV_KEY: &str = "MACHINE_PLUGIN_TOKEN";

/// Sentinel value [`PLUGIN_ENV_KEY`] must hold
pub const PLUGIN_ENV_VAL: &str = "42";

/// Environment variable naming the driver a plugin serves
pub const PLUGIN_ENV_DRIVER_NAME: &str = "MACHINE_PLUGIN_DRIVER_NAME";

/// Optional override, in milliseconds, of how long a plugin waits for its
/// parent to connect
pub const PLUGIN_ENV_ACCEPT_TIMEOUT: &str = "MACHINE_PLUGIN_ACCEPT_TIMEOUT_MS";

/// Prefix of standalone plugin executables searched on `PATH`
pub const PLUGIN_BINARY_PREFIX: &str = "machina-driver-";
