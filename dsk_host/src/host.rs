//! Host process: devices and wiring built from a [`HostConfig`].

use dsk_core::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::control_system::LocalControlSystem;
use crate::device_registry::DeviceRegistry;

/// Poll interval of [`Host::run`].
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Owns the control system, the device registry and the running flag.
pub struct Host {
    registry: DeviceRegistry,
    running: Arc<AtomicBool>,
}

impl Host {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self {
            registry,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Validate `config`, then create its devices and apply its links and
    /// commands in file order.
    ///
    /// # Errors
    ///
    /// The first configuration, creation, wiring or command error. Devices
    /// created before the failure are destroyed again.
    pub fn from_config(config: &HostConfig) -> KernelResult<Self> {
        config.validate()?;
        let registry = DeviceRegistry::with_builtin_devices(LocalControlSystem::new())?;
        let mut host = Self::new(registry);
        if let Err(e) = host.apply(config) {
            host.shutdown();
            return Err(e);
        }
        info!(
            "Host '{}' ready: {} devices, {} subscriptions, {} replications",
            config.shared.service_name,
            config.devices.len(),
            config.subscriptions.len(),
            config.replications.len()
        );
        Ok(host)
    }

    fn apply(&mut self, config: &HostConfig) -> KernelResult<()> {
        for device in &config.devices {
            self.registry.create_device(device)?;
        }
        let cs = Arc::clone(self.registry.control_system());
        for link in &config.subscriptions {
            cs.subscribe(&link.from, &link.to)?;
        }
        for link in &config.replications {
            cs.replicate(&link.from, &link.to)?;
        }
        for command in &config.commands {
            let reply = cs.run_command(&command.component, &command.command, &command.args)?;
            debug!("{} {} -> {:?}", command.component, command.command, reply);
        }
        Ok(())
    }

    pub fn control_system(&self) -> &Arc<LocalControlSystem> {
        self.registry.control_system()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    /// Flag cleared to stop [`run`](Self::run).
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Block until the running flag is cleared.
    pub fn run(&self) {
        info!("Host running, waiting for shutdown signal");
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(IDLE_POLL);
        }
    }

    /// Destroy every device.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.registry.destroy_all();
        info!("Host shut down");
    }
}
