//! # DSK Host Library
//!
//! Runs device-support trees inside a single process, without an external
//! control system.
//!
//! # Module Structure
//!
//! - [`control_system`] - `LocalControlSystem`, the in-process adapter
//! - [`device_registry`] - Device factory registration and device ownership
//! - [`devices`] - Built-in devices
//! - [`host`] - Devices and wiring built from a `HostConfig`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     dsk_host (single crate)                  │
//! │  ┌──────────────┐    ┌──────────────┐    ┌────────────────┐  │
//! │  │  HostConfig  │───►│     Host     │───►│ DeviceRegistry │  │
//! │  │ (dsk_common) │    │              │    │  (factories)   │  │
//! │  └──────────────┘    └──────┬───────┘    └───────┬────────┘  │
//! │                             │ links, commands    │ trees     │
//! │                             ▼                    ▼           │
//! │                   ┌────────────────────────────────────┐     │
//! │                   │        LocalControlSystem          │     │
//! │                   │   (ControlSystem for dsk_core)     │     │
//! │                   └────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod control_system;
pub mod device_registry;
pub mod devices;
pub mod host;

// Re-export key types for convenience
pub use crate::control_system::{LocalControlSystem, PushRecord};
pub use crate::device_registry::DeviceRegistry;
pub use crate::devices::{Device, DeviceFactory};
pub use crate::host::Host;
