//! Built-in devices.
//!
//! - [`signal_source`] - array sources refreshed through an `IncreaseSources` PV
//! - [`multiplexer`] - a multiplexing scheduling node
//!
//! # Adding New Devices
//!
//! 1. Create a new submodule under `devices/`
//! 2. Implement [`Device`] and a [`DeviceFactory`] for it
//! 3. Register the factory in [`register_builtin_devices`]

pub mod multiplexer;
pub mod signal_source;

use dsk_core::prelude::*;
use std::str::FromStr;
use std::sync::Arc;

use crate::device_registry::DeviceRegistry;

/// A device instance: one tree rooted at a node named after the device.
pub trait Device: Send + Sync {
    /// Factory name the device was created with.
    fn device_type(&self) -> &'static str;

    /// Root of the device's tree.
    fn root(&self) -> &Arc<Node>;
}

/// Builds the tree of a device. The root node must carry `config.name`.
pub type DeviceFactory = fn(&DeviceConfig) -> KernelResult<Box<dyn Device>>;

/// Register every built-in device type.
///
/// # Errors
///
/// `DeviceTypeAlreadyRegistered` when a built-in name is already taken.
pub fn register_builtin_devices(registry: &mut DeviceRegistry) -> Result<(), WiringError> {
    registry.register(signal_source::DEVICE_TYPE, signal_source::create_device)?;
    registry.register(multiplexer::DEVICE_TYPE, multiplexer::create_device)?;
    Ok(())
}

/// Read an optional parameter, falling back to `default`.
pub(crate) fn parameter<T: FromStr>(config: &DeviceConfig, key: &str, default: T) -> Result<T, WiringError> {
    match config.parameters.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            WiringError::InvalidParameter(format!("{}: '{}' is not a valid {}", config.name, raw, key))
        }),
    }
}

/// Array type named by the `value_type` parameter (element type, e.g. `"int32"`).
pub(crate) fn array_type(config: &DeviceConfig, default: ValueType) -> Result<ValueType, WiringError> {
    let Some(raw) = config.parameters.get("value_type") else {
        return Ok(default);
    };
    let value_type = match raw.trim().to_ascii_lowercase().as_str() {
        "int8" => ValueType::Int8Array,
        "uint8" => ValueType::UInt8Array,
        "int16" => ValueType::Int16Array,
        "uint16" => ValueType::UInt16Array,
        "int32" => ValueType::Int32Array,
        "uint32" => ValueType::UInt32Array,
        "int64" => ValueType::Int64Array,
        "float32" => ValueType::Float32Array,
        "float64" => ValueType::Float64Array,
        other => {
            return Err(WiringError::InvalidParameter(format!(
                "{}: unsupported value_type '{}'",
                config.name, other
            )));
        }
    };
    Ok(value_type)
}
