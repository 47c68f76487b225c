//! Machina
//!
//! Hypervisor drivers hosted in-process or in plugin processes, behind one
//! client API.

#![forbid(unsafe_code)]

pub mod client;
pub mod core;
pub mod driver;
pub mod error;
pub mod plugin;
pub mod prelude;

pub use crate::client::{
    Client, ClientType, new_api_client, new_api_client_from_config, new_api_client_with,
};
pub use crate::core::{ClientOptions, ConfigStore, Host};
pub use crate::driver::{Driver, DriverError, MachineState};
pub use crate::error::{MachineError, Result};
pub use crate::plugin::start_driver;
