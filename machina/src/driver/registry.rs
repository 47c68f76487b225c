//! Name to constructor mapping for drivers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use super::{Driver, NoneDriver, VirtualBoxDriver, none, virtualbox};
use crate::error::MachineError;

/// Produces an empty, not-yet-configured driver instance.
pub type DriverFactory = Arc<dyn Fn() -> Box<dyn Driver> + Send + Sync>;

/// Thread-safe driver registry.
///
/// Filled during process initialization and only read afterwards, so lookups
/// from concurrent `new_host` calls never contend on a writer.
pub struct DriverRegistry {
    factories: RwLock<HashMap<String, DriverFactory>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding the drivers compiled into this binary
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.insert(virtualbox::DRIVER_NAME, || {
            Box::new(VirtualBoxDriver::new("", ""))
        });
        registry.insert(none::DRIVER_NAME, || Box::new(NoneDriver::new("", "")));
        registry
    }

    fn insert<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Driver> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(name.to_string(), Arc::new(factory));
    }

    /// Register a driver constructor under `name`
    pub fn register<F>(&self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Driver> + Send + Sync + 'static,
    {
        if name.is_empty() {
            bail!("Driver name must not be empty");
        }

        let mut factories = self.factories.write();
        if factories.contains_key(name) {
            bail!("Driver '{}' already registered", name);
        }

        debug!("Registered driver: {}", name);
        factories.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Find the constructor for `name`
    pub fn lookup(&self, name: &str) -> std::result::Result<DriverFactory, MachineError> {
        self.factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MachineError::UnknownDriver(name.to_string()))
    }

    /// Construct an empty driver registered under `name`
    pub fn new_driver(&self, name: &str) -> std::result::Result<Box<dyn Driver>, MachineError> {
        let factory = self.lookup(name)?;
        Ok(factory())
    }

    /// Check if a driver is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

static DEFAULT_REGISTRY: Lazy<Arc<DriverRegistry>> =
    Lazy::new(|| Arc::new(DriverRegistry::with_builtin()));

/// Get the process-wide registry holding the built-in drivers
pub fn default_registry() -> Arc<DriverRegistry> {
    DEFAULT_REGISTRY.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_drivers_are_registered() {
        let registry = DriverRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["none", "virtualbox"]);

        let driver = registry.new_driver("virtualbox").unwrap();
        assert_eq!(driver.driver_name(), "virtualbox");
        assert_eq!(driver.machine_name(), "");
    }

    #[test]
    fn unknown_name_is_reported() {
        let registry = DriverRegistry::new();
        match registry.lookup("hyperkit") {
            Err(MachineError::UnknownDriver(name)) => assert_eq!(name, "hyperkit"),
            _ => panic!("expected UnknownDriver"),
        }
    }

    #[test]
    fn rejects_duplicate_and_empty_names() {
        let registry = DriverRegistry::with_builtin();
        assert!(registry
            .register("none", || Box::new(NoneDriver::default()))
            .is_err());
        assert!(registry
            .register("", || Box::new(NoneDriver::default()))
            .is_err());
        assert!(registry
            .register("none-2", || Box::new(NoneDriver::default()))
            .is_ok());
        assert!(registry.contains("none-2"));
    }

    #[test]
    fn default_registry_is_shared() {
        assert!(Arc::ptr_eq(&default_registry(), &default_registry()));
        assert!(default_registry().contains("virtualbox"));
    }
}
