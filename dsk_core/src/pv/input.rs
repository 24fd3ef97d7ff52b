//! Input PVs: values flowing from the device to the control system.

use dsk_common::error::{KernelResult, WiringError};
use dsk_common::value::{PvStatus, Timestamp, Value, ValueType};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

use crate::component::{Component, ComponentCore, component_event};
use crate::control_system::{CommandDefinition, ComponentRef, ControlSystem};
use crate::pv::fanout::FanOut;
use crate::pv::{OutputPv, PvMetadata, validate};

#[derive(Debug)]
struct Slot {
    timestamp: Timestamp,
    value: Value,
    status: PvStatus,
    decimation: u32,
    count: u32,
}

/// A value produced by the device.
///
/// Every `push` stores the value. Every `decimation`-th push is also
/// forwarded to the adapter, to subscribed output PVs and to replication
/// targets.
pub struct InputPv {
    core: ComponentCore,
    value_type: ValueType,
    metadata: RwLock<PvMetadata>,
    slot: Mutex<Slot>,
    fanout: FanOut,
}

impl InputPv {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            core: ComponentCore::new(name),
            value_type,
            metadata: RwLock::new(PvMetadata::default()),
            slot: Mutex::new(Slot {
                timestamp: Timestamp::ZERO,
                value: Value::default_for(value_type),
                status: PvStatus::Success,
                decimation: 1,
                count: 0,
            }),
            fanout: FanOut::default(),
        }
    }

    pub fn with_metadata(self, metadata: PvMetadata) -> Self {
        *self.metadata.write() = metadata;
        self
    }

    pub fn with_decimation(self, factor: u32) -> Self {
        self.set_decimation(factor);
        self
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn metadata(&self) -> PvMetadata {
        self.metadata.read().clone()
    }

    // ─── Values ─────────────────────────────────────────────────────

    /// Store and, subject to decimation, forward a value.
    pub fn push(&self, timestamp: Timestamp, value: Value) -> KernelResult<()> {
        self.push_with_status(timestamp, value, PvStatus::Success)
    }

    pub fn push_with_status(
        &self,
        timestamp: Timestamp,
        value: Value,
        status: PvStatus,
    ) -> KernelResult<()> {
        validate(&self.core.full_name(), self.value_type, &self.metadata.read(), &value)?;

        let forward = {
            let mut slot = self.slot.lock();
            slot.timestamp = timestamp;
            slot.value = value.clone();
            slot.status = status;
            slot.count += 1;
            if slot.count >= slot.decimation {
                slot.count = 0;
                true
            } else {
                false
            }
        };

        if forward {
            if let Some(cs) = self.core.control_system() {
                cs.push(self, timestamp, &value, status);
            }
            self.fanout.deliver(&self.core, timestamp, &value, status);
        }
        Ok(())
    }

    /// Update the stored value without forwarding it.
    pub fn set_value(&self, timestamp: Timestamp, value: Value) -> KernelResult<()> {
        validate(&self.core.full_name(), self.value_type, &self.metadata.read(), &value)?;
        let mut slot = self.slot.lock();
        slot.timestamp = timestamp;
        slot.value = value;
        Ok(())
    }

    /// Last stored value and its timestamp.
    pub fn read(&self) -> (Timestamp, Value) {
        let slot = self.slot.lock();
        (slot.timestamp, slot.value.clone())
    }

    pub fn status(&self) -> PvStatus {
        self.slot.lock().status
    }

    // ─── Decimation ─────────────────────────────────────────────────

    pub fn decimation(&self) -> u32 {
        self.slot.lock().decimation
    }

    /// Forward every `factor`-th push. Factors below 1 are clamped to 1.
    /// Resets the push counter.
    pub fn set_decimation(&self, factor: u32) {
        let factor = if factor < 1 {
            component_event!(self.core, warn, "Decimation factor {} clamped to 1", factor);
            1
        } else {
            factor
        };
        let mut slot = self.slot.lock();
        slot.decimation = factor;
        slot.count = 0;
    }

    // ─── Subscription ───────────────────────────────────────────────

    /// Deliver every forwarded value to `receiver`. Subscribing twice is a no-op.
    pub fn subscribe_receiver(&self, receiver: &Arc<OutputPv>) {
        if self.fanout.subscribe(receiver) {
            component_event!(self.core, debug, "Subscribed {}", receiver.full_name());
        }
    }

    pub fn unsubscribe_receiver(&self, receiver: &Arc<OutputPv>) {
        self.fanout.unsubscribe(receiver);
        component_event!(self.core, debug, "Unsubscribed {}", receiver.full_name());
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout.subscriber_count()
    }

    // ─── Replication ────────────────────────────────────────────────

    /// Push every forwarded value into `destination` as well.
    ///
    /// # Errors
    ///
    /// `WiringError::InvalidParameter` when `destination` is this PV.
    pub fn replicate_to(self: &Arc<Self>, destination: &Arc<InputPv>) -> KernelResult<()> {
        if Arc::ptr_eq(self, destination) {
            return Err(WiringError::InvalidParameter(format!(
                "{} cannot replicate to itself",
                self.core.full_name()
            ))
            .into());
        }
        if self.fanout.replicate_to(destination) {
            component_event!(self.core, debug, "Replicating to {}", destination.full_name());
        }
        Ok(())
    }

    pub fn stop_replication_to(&self, destination: &Arc<InputPv>) {
        self.fanout.stop_replication_to(destination);
        component_event!(self.core, debug, "Stopped replication to {}", destination.full_name());
    }

    /// Make this PV a replication target of the input PV named `source`.
    ///
    /// # Errors
    ///
    /// - `TreeError::NotInitialized` before `initialize`
    /// - `WiringError::MissingInputPv` when `source` does not resolve
    pub fn replicate_from(self: &Arc<Self>, source: &str) -> KernelResult<()> {
        let source_pv = self.resolve(source)?;
        source_pv.replicate_to(self)
    }

    /// Undo [`replicate_from`](Self::replicate_from).
    pub fn stop_replication_from(self: &Arc<Self>, source: &str) -> KernelResult<()> {
        let source_pv = self.resolve(source)?;
        source_pv.stop_replication_to(self);
        Ok(())
    }

    pub fn replica_count(&self) -> usize {
        self.fanout.replica_count()
    }

    fn resolve(&self, name: &str) -> KernelResult<Arc<InputPv>> {
        let cs = self.core.control_system().ok_or_else(|| {
            dsk_common::error::TreeError::NotInitialized(self.core.full_name())
        })?;
        cs.find_input_pv(name)
            .ok_or_else(|| WiringError::MissingInputPv(name.to_string()).into())
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    pub(crate) fn register(self: &Arc<Self>, cs: &Arc<dyn ControlSystem>) -> KernelResult<()> {
        cs.initialize(ComponentRef::Input(self))?;
        self.core.bind(Arc::clone(cs));
        Ok(())
    }

    /// `replicate` and `decimation`.
    pub(crate) fn define_commands(self: &Arc<Self>, cs: &Arc<dyn ControlSystem>) -> KernelResult<()> {
        let name = self.core.full_name();

        let weak = Arc::downgrade(self);
        cs.define_command(
            &name,
            CommandDefinition::new(
                "replicate",
                "replicate <sourcePvName>",
                1,
                move |args| {
                    live(&weak)?.replicate_from(&args[0])?;
                    Ok(Vec::new())
                },
            ),
        )?;

        let weak = Arc::downgrade(self);
        cs.define_command(
            &name,
            CommandDefinition::new("decimation", "decimation <factor>", 1, move |args| {
                let factor: u32 = args[0].parse().map_err(|_| {
                    WiringError::InvalidParameter(format!("decimation factor '{}'", args[0]))
                })?;
                live(&weak)?.set_decimation(factor);
                Ok(Vec::new())
            }),
        )
    }

    pub(crate) fn deinitialize(self: &Arc<Self>) {
        if let Some(cs) = self.core.control_system() {
            cs.deinitialize(ComponentRef::Input(self));
        }
        self.fanout.clear();
        self.core.unbind();
    }
}

fn live(weak: &Weak<InputPv>) -> KernelResult<Arc<InputPv>> {
    weak.upgrade()
        .ok_or_else(|| dsk_common::error::TreeError::Detached.into())
}

impl Component for InputPv {
    fn core(&self) -> &ComponentCore {
        &self.core
    }
}

impl std::fmt::Debug for InputPv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputPv")
            .field("name", &self.core.name())
            .field("value_type", &self.value_type)
            .field("decimation", &self.decimation())
            .finish_non_exhaustive()
    }
}
