//! Array signal sources.
//!
//! ```text
//! <name>                      port
//! └── Source                  node, state machine auto-enabled to running
//!     ├── Channel_0..N        input PVs, `samples` elements each
//!     ├── Loopback            input PV, replication target
//!     └── IncreaseSources     output PV; a non-zero write pushes a fresh ramp
//! ```
//!
//! Every refresh continues the ramp where the previous channel stopped, so
//! channel `i` of refresh `k` starts at `(k * channels + i) * samples`.

use dsk_core::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{Device, array_type, parameter};

pub const DEVICE_TYPE: &str = "signal_source";

const DEFAULT_CHANNELS: usize = 4;
const DEFAULT_SAMPLES: usize = 20;

pub struct SignalSource {
    root: Arc<Node>,
    source: Arc<Node>,
    channels: Vec<Handle<InputPv>>,
}

impl SignalSource {
    /// Build the tree.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` when `samples` or `channels` is zero.
    pub fn new(name: &str, channels: usize, samples: usize, value_type: ValueType) -> KernelResult<Self> {
        if channels == 0 || samples == 0 {
            return Err(WiringError::InvalidParameter(format!(
                "{name}: channels and samples must be positive"
            ))
            .into());
        }

        let root = Node::new_port(name);
        let source = root.add_child(Node::new("Source"))?.upgrade()?;
        let machine = source.add_child(
            StateMachine::new(false, StateHandlers::default()).with_auto_enable(AutoEnable::DriveToRunning),
        )?;

        let channel_handles = (0..channels)
            .map(|i| {
                source.add_child(
                    InputPv::new(format!("Channel_{i}"), value_type).with_metadata(
                        PvMetadata::interrupt()
                            .with_description(format!("Signal channel {i}"))
                            .with_max_elements(samples),
                    ),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        source.add_child(
            InputPv::new("Loopback", value_type)
                .with_metadata(PvMetadata::interrupt().with_description("Replication target")),
        )?;

        let next = Arc::new(AtomicI64::new(0));
        let targets = channel_handles.clone();
        let clock = Arc::downgrade(&source);
        source.add_child(
            OutputPv::new("IncreaseSources", ValueType::Int32)
                .with_metadata(PvMetadata::default().with_description("Set 1 to increase sources"))
                .with_write(move |_, value| {
                    if value.as_i32().unwrap_or_default() == 0 {
                        return Ok(());
                    }
                    let state = machine.upgrade().map_err(KernelError::from)?.state();
                    if state != State::Running {
                        return Err(format!("sources can only be increased while running (now {state})").into());
                    }
                    let timestamp = clock.upgrade().map_or_else(Timestamp::now, |node| node.timestamp());
                    for target in &targets {
                        let start = next.fetch_add(samples as i64, Ordering::SeqCst);
                        let channel = target.upgrade().map_err(KernelError::from)?;
                        channel.push(timestamp, ramp(value_type, start, samples))?;
                    }
                    Ok(())
                }),
        )?;

        Ok(Self {
            root,
            source,
            channels: channel_handles,
        })
    }

    pub fn source(&self) -> &Arc<Node> {
        &self.source
    }

    pub fn channel(&self, index: usize) -> KernelResult<Arc<InputPv>> {
        let handle = self.channels.get(index).ok_or_else(|| {
            WiringError::MissingInputPv(format!("{}.Channel_{index}", self.source.full_name()))
        })?;
        Ok(handle.upgrade()?)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Device for SignalSource {
    fn device_type(&self) -> &'static str {
        DEVICE_TYPE
    }

    fn root(&self) -> &Arc<Node> {
        &self.root
    }
}

/// Factory: `channels` (default 4), `samples` (default 20), `value_type`
/// (element type, default `int32`).
pub fn create_device(config: &DeviceConfig) -> KernelResult<Box<dyn Device>> {
    let channels = parameter(config, "channels", DEFAULT_CHANNELS)?;
    let samples = parameter(config, "samples", DEFAULT_SAMPLES)?;
    let value_type = array_type(config, ValueType::Int32Array)?;
    Ok(Box::new(SignalSource::new(&config.name, channels, samples, value_type)?))
}

/// `len` consecutive values starting at `start`, as an array of `value_type`.
fn ramp(value_type: ValueType, start: i64, len: usize) -> Value {
    let values = (start..).take(len);
    match value_type {
        ValueType::Int8Array => Value::Int8Array(values.map(|v| v as i8).collect()),
        ValueType::UInt8Array => Value::UInt8Array(values.map(|v| v as u8).collect()),
        ValueType::Int16Array => Value::Int16Array(values.map(|v| v as i16).collect()),
        ValueType::UInt16Array => Value::UInt16Array(values.map(|v| v as u16).collect()),
        ValueType::UInt32Array => Value::UInt32Array(values.map(|v| v as u32).collect()),
        ValueType::Int64Array => Value::Int64Array(values.collect()),
        ValueType::Float32Array => Value::Float32Array(values.map(|v| v as f32).collect()),
        ValueType::Float64Array => Value::Float64Array(values.map(|v| v as f64).collect()),
        _ => Value::Int32Array(values.map(|v| v as i32).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_follows_value_type() {
        assert_eq!(ramp(ValueType::Int32Array, 4, 3), Value::Int32Array(vec![4, 5, 6]));
        assert_eq!(ramp(ValueType::Float64Array, 0, 2), Value::Float64Array(vec![0.0, 1.0]));
    }

    #[test]
    fn builds_named_channels() {
        let device = SignalSource::new("src", 2, 4, ValueType::Int32Array).unwrap();
        assert_eq!(device.channel_count(), 2);
        assert_eq!(device.channel(1).unwrap().full_name(), "src-Source.Channel_1");
        assert!(device.channel(2).is_err());
        assert!(device.source().child("IncreaseSources").is_some());
        assert!(SignalSource::new("src", 0, 4, ValueType::Int32Array).is_err());
    }

    #[test]
    fn increase_requires_running_machine() {
        let device = SignalSource::new("src", 1, 2, ValueType::Int32Array).unwrap();
        let increase = device
            .source()
            .child("IncreaseSources")
            .and_then(|c| c.as_output().cloned())
            .unwrap();
        assert!(increase.write(Timestamp::ZERO, Value::Int32(1)).is_err());

        device.source().state_machine().unwrap().drive_to(State::Running).unwrap();
        increase.write(Timestamp::ZERO, Value::Int32(1)).unwrap();
        increase.write(Timestamp::ZERO, Value::Int32(1)).unwrap();
        assert_eq!(device.channel(0).unwrap().read().1, Value::Int32Array(vec![2, 3]));
    }
}
