//! Trigger-driven processing nodes.
//!
//! A [`SchedulingNode`] is a node with `N` data inputs (`DataIn_i`, output
//! PVs written by the control system), `M` data outputs (`DataOut_i`, input
//! PVs pushed by the node), a `Trigger` PV and a synchronous state machine.
//! Writing a non-zero value to `Trigger` while the machine is `Running` runs
//! the node's action.
//!
//! [`Multiplexer`] is the built-in specialization that concatenates the
//! first `SamplesPerChannel` elements of every input into its only output.

use dsk_common::error::{DelegateError, KernelError, KernelResult, ProcessingError, TreeError, WiringError};
use dsk_common::state::State;
use dsk_common::value::{Timestamp, Value, ValueType};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, OnceLock, Weak};

use crate::component::{Component, TimestampDelegate, component_event};
use crate::node::{Handle, Node};
use crate::pv::{InputPv, OutputPv, PvMetadata};
use crate::state_machine::{StateHandlers, StateMachine};

/// Action run on trigger: `(node, timestamp, trigger value)`.
pub type ProcessAction = Arc<dyn Fn(&SchedulingNode, Timestamp, i32) -> KernelResult<()> + Send + Sync>;

/// Generic N-input / M-output processing node.
pub struct SchedulingNode {
    node: Arc<Node>,
    inputs: Vec<Handle<OutputPv>>,
    outputs: Vec<Handle<InputPv>>,
    trigger: Handle<OutputPv>,
    state_machine: Handle<StateMachine>,
    value_type: ValueType,
    action: ProcessAction,
    start_time: Mutex<Timestamp>,
    start_timestamp: RwLock<Option<TimestampDelegate>>,
}

impl SchedulingNode {
    /// Build the node and its children.
    ///
    /// `handlers` drive the node's synchronous state machine; the start
    /// time is recorded just before the `start` handler runs.
    pub fn new(
        name: impl Into<String>,
        inputs: usize,
        outputs: usize,
        value_type: ValueType,
        handlers: StateHandlers,
        action: impl Fn(&SchedulingNode, Timestamp, i32) -> KernelResult<()> + Send + Sync + 'static,
    ) -> KernelResult<Arc<Self>> {
        let node = Node::new(name);
        let owner: Arc<OnceLock<Weak<SchedulingNode>>> = Arc::default();

        let user_start = handlers.start_delegate();
        let start_owner = Arc::clone(&owner);
        let handlers = handlers.on_start(move || {
            if let Some(scheduler) = start_owner.get().and_then(Weak::upgrade) {
                scheduler.record_start();
            }
            user_start()
        });
        let state_machine = node.add_child(StateMachine::new(false, handlers))?;

        let trigger_owner = Arc::clone(&owner);
        let trigger = node.add_child(
            OutputPv::new("Trigger", ValueType::Int32)
                .with_metadata(PvMetadata::default().with_description("Trigger the node"))
                .with_write(move |timestamp, value| {
                    let scheduler = trigger_owner
                        .get()
                        .and_then(Weak::upgrade)
                        .ok_or_else(|| DelegateError::from("scheduling node dropped"))?;
                    scheduler.fire(timestamp, value.as_i32().unwrap_or_default())
                }),
        )?;

        let inputs = (0..inputs)
            .map(|i| {
                node.add_child(OutputPv::new(format!("DataIn_{i}"), value_type).with_metadata(
                    PvMetadata::interrupt().with_description(format!("Data Input {i}")),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = (0..outputs)
            .map(|i| {
                node.add_child(InputPv::new(format!("DataOut_{i}"), value_type).with_metadata(
                    PvMetadata::interrupt().with_description(format!("Data Output {i}")),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let scheduler = Arc::new(Self {
            node,
            inputs,
            outputs,
            trigger,
            state_machine,
            value_type,
            action: Arc::new(action),
            start_time: Mutex::new(Timestamp::ZERO),
            start_timestamp: RwLock::new(None),
        });
        let _ = owner.set(Arc::downgrade(&scheduler));
        Ok(scheduler)
    }

    fn fire(&self, timestamp: Timestamp, value: i32) -> Result<(), DelegateError> {
        if value == 0 {
            return Ok(());
        }
        let state = self.state_machine().map_err(KernelError::from)?.state();
        if state != State::Running {
            component_event!(self.node.core(), debug, "Trigger ignored in state {}", state);
            return Ok(());
        }
        (self.action)(self, timestamp, value).map_err(|err| {
            component_event!(self.node.core(), error, "Processing failed: {}", err);
            DelegateError::from(err)
        })
    }

    fn record_start(&self) {
        let delegate = self.start_timestamp.read().clone();
        let now = match delegate {
            Some(delegate) => delegate(),
            None => self.node.timestamp(),
        };
        *self.start_time.lock() = now;
    }

    // ─── Accessors ──────────────────────────────────────────────────

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// `DataIn_index`.
    pub fn input(&self, index: usize) -> KernelResult<Arc<OutputPv>> {
        let handle = self.inputs.get(index).ok_or_else(|| {
            WiringError::MissingOutputPv(format!("{}.DataIn_{index}", self.node.full_name()))
        })?;
        Ok(handle.upgrade()?)
    }

    /// `DataOut_index`.
    pub fn output(&self, index: usize) -> KernelResult<Arc<InputPv>> {
        let handle = self.outputs.get(index).ok_or_else(|| {
            WiringError::MissingInputPv(format!("{}.DataOut_{index}", self.node.full_name()))
        })?;
        Ok(handle.upgrade()?)
    }

    pub fn trigger(&self) -> KernelResult<Arc<OutputPv>> {
        Ok(self.trigger.upgrade()?)
    }

    pub fn state_machine(&self) -> Result<Arc<StateMachine>, TreeError> {
        self.state_machine.upgrade()
    }

    pub(crate) fn state_machine_handle(&self) -> Handle<StateMachine> {
        self.state_machine.clone()
    }

    /// Current value of `DataIn_index`.
    pub fn read_input(&self, index: usize) -> KernelResult<(Timestamp, Value)> {
        Ok(self.input(index)?.read())
    }

    /// Push `value` on `DataOut_index`.
    pub fn publish(&self, index: usize, timestamp: Timestamp, value: Value) -> KernelResult<()> {
        let output = self
            .output(index)
            .map_err(|_| ProcessingError::MissingOutput(self.node.full_name()))?;
        output.push(timestamp, value)
    }

    /// Time recorded by the last `on → running` transition.
    pub fn start_timestamp(&self) -> Timestamp {
        *self.start_time.lock()
    }

    /// Override the source of the start time.
    pub fn set_start_timestamp_delegate(&self, delegate: TimestampDelegate) {
        *self.start_timestamp.write() = Some(delegate);
    }
}

impl std::fmt::Debug for SchedulingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingNode")
            .field("name", &self.node.name())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("value_type", &self.value_type)
            .finish_non_exhaustive()
    }
}

// ─── Multiplexer ────────────────────────────────────────────────────

/// Concatenates `SamplesPerChannel` leading elements of each input.
///
/// ```text
/// output[i * samples + j] = input_i[j]
/// ```
pub struct Multiplexer {
    scheduler: Arc<SchedulingNode>,
    samples: Handle<OutputPv>,
    samples_rbv: Handle<InputPv>,
}

impl Multiplexer {
    /// # Errors
    ///
    /// `WiringError::InvalidParameter` when `value_type` is not an array type.
    pub fn new(name: impl Into<String>, inputs: usize, value_type: ValueType) -> KernelResult<Arc<Self>> {
        if !value_type.is_array() {
            return Err(WiringError::InvalidParameter(format!(
                "multiplexer needs an array type, got {value_type}"
            ))
            .into());
        }

        let readback: Arc<OnceLock<Handle<InputPv>>> = Arc::default();

        let allow_readback = Arc::clone(&readback);
        let handlers = StateHandlers::default().allow_change(move |current, _global, target| {
            if current != State::On || target != State::Running {
                return true;
            }
            let Some(pv) = allow_readback.get().and_then(|h| h.upgrade().ok()) else {
                return false;
            };
            let samples = pv.read().1.as_i32().unwrap_or_default();
            if samples <= 0 {
                component_event!(pv.core(), warn, "SamplesPerChannel must be greater than 0 to start");
                return false;
            }
            true
        });

        let action_readback = Arc::clone(&readback);
        let scheduler = SchedulingNode::new(name, inputs, 1, value_type, handlers, move |scheduler, _, _| {
            let rbv = action_readback.get().ok_or(TreeError::Detached)?.upgrade()?;
            multiplex(scheduler, &rbv)
        })?;

        let node = scheduler.node();
        let samples_rbv = node.add_child(
            InputPv::new("SamplesPerChannel_RBV", ValueType::Int32)
                .with_metadata(PvMetadata::interrupt().with_description("Current samples per channel")),
        )?;
        let _ = readback.set(samples_rbv.clone());

        let machine = scheduler.state_machine_handle();
        let rbv = samples_rbv.clone();
        let samples = node.add_child(
            OutputPv::new("SamplesPerChannel", ValueType::Int32)
                .with_metadata(PvMetadata::default().with_description("Samples per channel"))
                .with_write(move |timestamp, value| {
                    let state = machine.upgrade().map_err(KernelError::from)?.state();
                    if state != State::On {
                        return Err(format!(
                            "samples per channel can only be modified in state on (now {state})"
                        )
                        .into());
                    }
                    rbv.upgrade()
                        .map_err(KernelError::from)?
                        .push(timestamp, value.clone())?;
                    Ok(())
                }),
        )?;

        Ok(Arc::new(Self {
            scheduler,
            samples,
            samples_rbv,
        }))
    }

    pub fn scheduler(&self) -> &Arc<SchedulingNode> {
        &self.scheduler
    }

    pub fn node(&self) -> &Arc<Node> {
        self.scheduler.node()
    }

    /// The `SamplesPerChannel` setting PV.
    pub fn samples_pv(&self) -> KernelResult<Arc<OutputPv>> {
        Ok(self.samples.upgrade()?)
    }

    /// The `SamplesPerChannel_RBV` readback PV.
    pub fn samples_readback(&self) -> KernelResult<Arc<InputPv>> {
        Ok(self.samples_rbv.upgrade()?)
    }

    /// Accepted samples-per-channel value; `0` until one is set.
    pub fn samples_per_channel(&self) -> i32 {
        self.samples_rbv
            .upgrade()
            .ok()
            .and_then(|pv| pv.read().1.as_i32())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("scheduler", &self.scheduler)
            .field("samples_per_channel", &self.samples_per_channel())
            .finish()
    }
}

fn multiplex(scheduler: &SchedulingNode, readback: &InputPv) -> KernelResult<()> {
    let samples = readback.read().1.as_i32().unwrap_or_default().max(0) as usize;
    let mut output = Value::default_for(scheduler.value_type());
    for index in 0..scheduler.input_count() {
        let input = scheduler.input(index)?;
        let (_, value) = input.read();
        let head = value.slice(samples).ok_or_else(|| ProcessingError::ShortInput {
            input: input.full_name(),
            samples,
            available: value.element_count(),
        })?;
        output.extend_from(&head);
    }
    scheduler.publish(0, scheduler.node().timestamp(), output)
}
