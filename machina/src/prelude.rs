// Convenience re-exports: use machina::prelude::*;
pub use crate::client::{Client, ClientType, LocalClient, RpcClient, new_api_client};
pub use crate::core::{AuthOptions, ClientOptions, ConfigStore, Configurable, Host};
pub use crate::driver::{Driver, DriverError, DriverErrorKind, MachineState};
pub use crate::error::{MachineError, Result};
pub use crate::plugin::{Launcher, Startup, start_driver};

// Re-export async_trait for Driver impls
pub use async_trait::async_trait;
