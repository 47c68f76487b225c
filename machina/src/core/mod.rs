pub mod config;
pub mod host;

pub use config::{ClientOptions, ConfigStore, Configurable};
pub use host::{AuthOptions, Host, with_store_path};
