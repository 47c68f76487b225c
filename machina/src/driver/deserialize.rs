use tracing::debug;

use super::{Driver, DriverError, DriverRegistry};
use crate::error::{MachineError, Result};

/// Build a configured driver from its registry name and raw persisted bytes.
///
/// Lookup failures are [`MachineError::UnknownDriver`], decode failures are
/// [`MachineError::InvalidConfig`]. No driver is returned on either path.
pub async fn resolve(
    registry: &DriverRegistry,
    name: &str,
    raw: &[u8],
) -> Result<Box<dyn Driver>> {
    let mut driver = registry.new_driver(name)?;

    driver
        .set_config_raw(raw)
        .await
        .map_err(|e| config_error(name, e))?;

    debug!(
        "Resolved driver '{}' for machine '{}'",
        name,
        driver.machine_name()
    );
    Ok(driver)
}

/// Classify a failure to apply configuration to a driver.
pub(crate) fn config_error(name: &str, err: DriverError) -> MachineError {
    match err {
        DriverError::InvalidConfig(reason) => MachineError::InvalidConfig {
            driver: name.to_string(),
            reason,
        },
        other => MachineError::Driver(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VBOX_CONFIG: &str = r#"{"MachineName": "minikube", "CPU": 2, "Memory": 2048}"#;

    #[tokio::test]
    async fn resolves_registered_driver() {
        let registry = DriverRegistry::with_builtin();
        let driver = resolve(&registry, "virtualbox", VBOX_CONFIG.as_bytes())
            .await
            .unwrap();
        assert_eq!(driver.driver_name(), "virtualbox");
        assert_eq!(driver.machine_name(), "minikube");
    }

    #[tokio::test]
    async fn unknown_driver_wins_over_bad_bytes() {
        let registry = DriverRegistry::with_builtin();
        for raw in [&b"?"[..], VBOX_CONFIG.as_bytes(), b""] {
            let err = resolve(&registry, "unknown", raw).await.err().unwrap();
            assert!(matches!(err, MachineError::UnknownDriver(_)));
        }
    }

    #[tokio::test]
    async fn malformed_bytes_are_invalid_config_for_every_driver() {
        let registry = DriverRegistry::with_builtin();
        for name in registry.names() {
            for raw in [&b"?"[..], b"", b"{\"MachineName\": 7}"] {
                let err = resolve(&registry, &name, raw).await.err().unwrap();
                assert!(
                    matches!(err, MachineError::InvalidConfig { ref driver, .. } if *driver == name),
                    "driver {} raw {:?} gave {:?}",
                    name,
                    raw,
                    err
                );
            }
        }
    }

    #[tokio::test]
    async fn empty_name_is_unknown() {
        let registry = DriverRegistry::with_builtin();
        let err = resolve(&registry, "", b"{}").await.err().unwrap();
        assert!(matches!(err, MachineError::UnknownDriver(_)));
    }
}
