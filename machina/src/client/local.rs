use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Client, ClientType};
use crate::core::{AuthOptions, ClientOptions, Host, with_store_path};
use crate::driver::{DriverRegistry, default_registry, resolve};
use crate::error::Result;

/// Resolves drivers in the calling process. No subprocess is involved.
pub struct LocalClient {
    options: ClientOptions,
    registry: Arc<DriverRegistry>,
}

impl LocalClient {
    pub fn new(options: ClientOptions) -> Self {
        Self::with_registry(options, default_registry())
    }

    pub fn with_registry(options: ClientOptions, registry: Arc<DriverRegistry>) -> Self {
        Self { options, registry }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }
}

#[async_trait]
impl Client for LocalClient {
    async fn new_host(&self, driver_name: &str, raw_driver: &[u8]) -> Result<Host> {
        let raw = with_store_path(raw_driver, &self.options.store_path);
        let driver = resolve(&self.registry, driver_name, &raw).await?;
        let host = Host::new(driver, raw.into_owned())
            .with_auth_options(AuthOptions::from(&self.options));
        debug!("Built local host '{}' ({})", host.name, host.driver_name);
        Ok(host)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn client_type(&self) -> ClientType {
        ClientType::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, MachineState, NoneDriver};
    use crate::error::MachineError;

    const VBOX_CONFIG: &[u8] = br#"{
        "IPAddress": "192.168.99.100",
        "MachineName": "minikube",
        "SSHUser": "docker",
        "SSHPort": 49152,
        "StorePath": "/home/user/.minikube",
        "CPU": 2,
        "Memory": 2048,
        "DiskSize": 20000,
        "Boot2DockerURL": "file:///home/user/.minikube/cache/iso/minikube.iso"
    }"#;

    #[tokio::test]
    async fn builds_host_for_registered_driver() {
        let client = LocalClient::new(ClientOptions::default());
        let host = client.new_host("virtualbox", VBOX_CONFIG).await.unwrap();

        assert_eq!(host.name, "minikube");
        assert_eq!(host.name, host.driver().machine_name());
        assert_eq!(host.driver_name, "virtualbox");
        assert_eq!(host.driver_name, host.driver().driver_name());
        assert_eq!(host.raw_driver, VBOX_CONFIG);
        assert_eq!(host.ip().await.unwrap(), "192.168.99.100");
    }

    #[tokio::test]
    async fn malformed_config_is_invalid_config() {
        let client = LocalClient::new(ClientOptions::default());
        let err = client.new_host("virtualbox", b"?").await.unwrap_err();
        assert!(matches!(err, MachineError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn unregistered_driver_is_unknown() {
        let client = LocalClient::new(ClientOptions::default());
        let err = client.new_host("hyperv2", b"{}").await.unwrap_err();
        assert!(matches!(err, MachineError::UnknownDriver(name) if name == "hyperv2"));
    }

    #[tokio::test]
    async fn uses_injected_registry() {
        let registry = Arc::new(DriverRegistry::new());
        registry
            .register("edge", || Box::new(NoneDriver::default()))
            .unwrap();
        let client = LocalClient::with_registry(ClientOptions::default(), registry);

        let mut host = client
            .new_host("edge", br#"{"MachineName": "e1"}"#)
            .await
            .unwrap();
        assert_eq!(host.name, "e1");
        // The factory's driver still reports its own name
        assert_eq!(host.driver_name, "none");

        host.create().await.unwrap();
        host.start().await.unwrap();
        assert_eq!(host.state().await.unwrap(), MachineState::Running);

        let err = client.new_host("virtualbox", b"{}").await.unwrap_err();
        assert!(matches!(err, MachineError::UnknownDriver(_)));
    }

    #[tokio::test]
    async fn options_reach_host_and_driver() {
        let client = LocalClient::new(ClientOptions::new("/srv/machina", "/srv/machina/tls"));
        let host = client
            .new_host("virtualbox", br#"{"MachineName": "vm1"}"#)
            .await
            .unwrap();

        assert_eq!(host.auth_options.certs_dir, std::path::Path::new("/srv/machina/tls"));
        assert_eq!(host.auth_options.store_path, std::path::Path::new("/srv/machina"));

        let persisted: serde_json::Value =
            serde_json::from_slice(&host.driver().get_config_raw().await.unwrap()).unwrap();
        assert_eq!(persisted["StorePath"], "/srv/machina");
        assert_eq!(
            host.driver().ssh_key_path().await.unwrap(),
            "/srv/machina/machines/vm1/id_rsa"
        );

        // An explicit store path in the configuration wins
        let host = client.new_host("virtualbox", VBOX_CONFIG).await.unwrap();
        let persisted: serde_json::Value =
            serde_json::from_slice(&host.driver().get_config_raw().await.unwrap()).unwrap();
        assert_eq!(persisted["StorePath"], "/home/user/.minikube");
    }

    #[tokio::test]
    async fn driver_failures_stay_local() {
        let client = LocalClient::new(ClientOptions::default());
        let mut host = client
            .new_host("none", br#"{"MachineName": "n1"}"#)
            .await
            .unwrap();
        let err = host.start().await.unwrap_err();
        assert!(matches!(err, MachineError::Driver(DriverError::InvalidState(_))));
        client.close().await.unwrap();
    }
}
