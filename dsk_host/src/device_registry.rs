//! Device registry.
//!
//! Provides a `DeviceRegistry` that maps device type names to factories and
//! owns every created device. Factories are injected at construction rather
//! than held in global state, so registries can be tested in isolation.

use dsk_core::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::control_system::LocalControlSystem;
use crate::devices::{Device, DeviceFactory, register_builtin_devices};

/// Registry of device types and live devices.
pub struct DeviceRegistry {
    control_system: Arc<LocalControlSystem>,
    factories: HashMap<&'static str, DeviceFactory>,
    devices: BTreeMap<String, Box<dyn Device>>,
}

impl DeviceRegistry {
    /// Create an empty registry whose devices register with `control_system`.
    pub fn new(control_system: Arc<LocalControlSystem>) -> Self {
        Self {
            control_system,
            factories: HashMap::new(),
            devices: BTreeMap::new(),
        }
    }

    /// Registry with every built-in device type.
    pub fn with_builtin_devices(control_system: Arc<LocalControlSystem>) -> Result<Self, WiringError> {
        let mut registry = Self::new(control_system);
        register_builtin_devices(&mut registry)?;
        Ok(registry)
    }

    pub fn control_system(&self) -> &Arc<LocalControlSystem> {
        &self.control_system
    }

    /// Register a device factory.
    ///
    /// # Errors
    ///
    /// `DeviceTypeAlreadyRegistered` when `name` is taken.
    pub fn register(&mut self, name: &'static str, factory: DeviceFactory) -> Result<(), WiringError> {
        if self.factories.contains_key(name) {
            return Err(WiringError::DeviceTypeAlreadyRegistered(name.to_string()));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Registered device type names, sorted.
    pub fn device_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Build a device and register its tree with the control system.
    ///
    /// # Errors
    ///
    /// - `DeviceAlreadyCreated` when a device named `config.name` exists
    /// - `DeviceTypeNotFound` for an unknown `config.device_type`
    /// - any factory or initialization error; nothing is kept in that case
    pub fn create_device(&mut self, config: &DeviceConfig) -> KernelResult<()> {
        if self.devices.contains_key(&config.name) {
            return Err(WiringError::DeviceAlreadyCreated(config.name.clone()).into());
        }
        let factory = self
            .factories
            .get(config.device_type.as_str())
            .ok_or_else(|| WiringError::DeviceTypeNotFound(config.device_type.clone()))?;

        let device = factory(config)?;
        device.root().initialize(self.control_system.clone())?;
        info!("Created {} device {}", device.device_type(), config.name);
        self.devices.insert(config.name.clone(), device);
        Ok(())
    }

    /// Deinitialize and drop a device.
    ///
    /// # Errors
    ///
    /// `DeviceNotAllocated` when no device has this name.
    pub fn destroy_device(&mut self, name: &str) -> KernelResult<()> {
        let device = self
            .devices
            .remove(name)
            .ok_or_else(|| WiringError::DeviceNotAllocated(name.to_string()))?;
        device.root().deinitialize()?;
        info!("Destroyed device {}", name);
        Ok(())
    }

    /// Destroy every device, in reverse name order. Failures are logged.
    pub fn destroy_all(&mut self) {
        for name in self.devices().into_iter().rev() {
            if let Err(e) = self.destroy_device(&name) {
                warn!("Destroying {} failed: {}", name, e);
            }
        }
    }

    /// Names of the live devices, sorted.
    pub fn devices(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn device(&self, name: &str) -> Option<&dyn Device> {
        self.devices.get(name).map(|d| d.as_ref())
    }
}
