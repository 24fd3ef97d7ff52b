//! Multiplexer device: a port holding one [`Multiplexer`] node named `Mux`.

use dsk_core::prelude::*;
use std::sync::Arc;

use super::{Device, array_type, parameter};

pub const DEVICE_TYPE: &str = "multiplexer";

const DEFAULT_INPUTS: usize = 4;

pub struct MultiplexerDevice {
    root: Arc<Node>,
    mux: Arc<Multiplexer>,
}

impl MultiplexerDevice {
    pub fn new(name: &str, inputs: usize, value_type: ValueType) -> KernelResult<Self> {
        let root = Node::new_port(name);
        let mux = Multiplexer::new("Mux", inputs, value_type)?;
        root.add_child(Arc::clone(mux.node()))?;
        Ok(Self { root, mux })
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.mux
    }
}

impl Device for MultiplexerDevice {
    fn device_type(&self) -> &'static str {
        DEVICE_TYPE
    }

    fn root(&self) -> &Arc<Node> {
        &self.root
    }
}

/// Factory: `inputs` (default 4), `value_type` (element type, default `int32`).
pub fn create_device(config: &DeviceConfig) -> KernelResult<Box<dyn Device>> {
    let inputs = parameter(config, "inputs", DEFAULT_INPUTS)?;
    let value_type = array_type(config, ValueType::Int32Array)?;
    Ok(Box::new(MultiplexerDevice::new(&config.name, inputs, value_type)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_device() {
        let device = MultiplexerDevice::new("mux", 2, ValueType::Float32Array).unwrap();
        let scheduler = device.multiplexer().scheduler();
        assert_eq!(scheduler.input(1).unwrap().full_name(), "mux-Mux.DataIn_1");
        assert_eq!(scheduler.output(0).unwrap().full_name(), "mux-Mux.DataOut_0");
        assert_eq!(device.device_type(), DEVICE_TYPE);
        assert!(device.root().is_port());
    }
}
