//! In-process control-system adapter.
//!
//! [`LocalControlSystem`] keeps every registered component by full name and
//! offers the host the operations a real control system exposes: linking
//! PVs by name, running commands, writing output PVs and reading back what
//! the devices pushed.

use dsk_core::prelude::*;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Last value an input PV forwarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushRecord {
    pub timestamp: Timestamp,
    pub value: Value,
    pub status: PvStatus,
    /// Values forwarded since registration.
    pub count: u64,
}

/// A registered component: its kind label and a weak reference to it.
struct Entry {
    kind: &'static str,
    target: Target,
}

enum Target {
    Node(Weak<Node>),
    Input(Weak<InputPv>),
    Output(Weak<OutputPv>),
    StateMachine(Weak<StateMachine>),
}

impl Entry {
    fn new(component: ComponentRef<'_>) -> Self {
        let target = match component {
            ComponentRef::Node(n) => Target::Node(Arc::downgrade(n)),
            ComponentRef::Input(pv) => Target::Input(Arc::downgrade(pv)),
            ComponentRef::Output(pv) => Target::Output(Arc::downgrade(pv)),
            ComponentRef::StateMachine(sm) => Target::StateMachine(Arc::downgrade(sm)),
        };
        Self {
            kind: component.kind(),
            target,
        }
    }

    /// Whether this entry was registered for `component` itself, not just
    /// for another component with the same full name.
    fn refers_to(&self, component: ComponentRef<'_>) -> bool {
        match (&self.target, component) {
            (Target::Node(w), ComponentRef::Node(c)) => Weak::as_ptr(w) == Arc::as_ptr(c),
            (Target::Input(w), ComponentRef::Input(c)) => Weak::as_ptr(w) == Arc::as_ptr(c),
            (Target::Output(w), ComponentRef::Output(c)) => Weak::as_ptr(w) == Arc::as_ptr(c),
            (Target::StateMachine(w), ComponentRef::StateMachine(c)) => Weak::as_ptr(w) == Arc::as_ptr(c),
            _ => false,
        }
    }
}

/// Control system living in the host process.
///
/// Holds only weak references: dropping a device's root releases its
/// components even if `deinitialize` was never called.
#[derive(Default)]
pub struct LocalControlSystem {
    components: RwLock<BTreeMap<String, Entry>>,
    commands: RwLock<HashMap<String, BTreeMap<String, CommandDefinition>>>,
    pushes: Mutex<HashMap<String, PushRecord>>,
    states: Mutex<BTreeMap<String, (State, Timestamp)>>,
}

impl LocalControlSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ─── Lookup ─────────────────────────────────────────────────────

    /// Full names of every registered component.
    pub fn components(&self) -> Vec<String> {
        self.components.read().keys().cloned().collect()
    }

    pub fn is_registered(&self, full_name: &str) -> bool {
        self.components.read().contains_key(full_name)
    }

    pub fn input(&self, full_name: &str) -> Option<Arc<InputPv>> {
        match self.components.read().get(full_name) {
            Some(Entry { target: Target::Input(pv), .. }) => pv.upgrade(),
            _ => None,
        }
    }

    pub fn output(&self, full_name: &str) -> Option<Arc<OutputPv>> {
        match self.components.read().get(full_name) {
            Some(Entry { target: Target::Output(pv), .. }) => pv.upgrade(),
            _ => None,
        }
    }

    pub fn node(&self, full_name: &str) -> Option<Arc<Node>> {
        match self.components.read().get(full_name) {
            Some(Entry { target: Target::Node(node), .. }) => node.upgrade(),
            _ => None,
        }
    }

    pub fn state_machine(&self, full_name: &str) -> Option<Arc<StateMachine>> {
        match self.components.read().get(full_name) {
            Some(Entry { target: Target::StateMachine(sm), .. }) => sm.upgrade(),
            _ => None,
        }
    }

    /// Last state reported for the machine with this full name.
    pub fn state(&self, machine: &str) -> Option<State> {
        self.states.lock().get(machine).map(|(state, _)| *state)
    }

    pub fn last_push(&self, input: &str) -> Option<PushRecord> {
        self.pushes.lock().get(input).cloned()
    }

    /// Commands defined on `component`, sorted.
    pub fn commands_of(&self, component: &str) -> Vec<String> {
        self.commands
            .read()
            .get(component)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    // ─── Wiring ─────────────────────────────────────────────────────

    /// Deliver every value forwarded by `input` to `output`.
    ///
    /// # Errors
    ///
    /// `MissingOutputPv` / `MissingInputPv` when a name does not resolve.
    pub fn subscribe(&self, input: &str, output: &str) -> KernelResult<()> {
        let receiver = self
            .output(output)
            .ok_or_else(|| WiringError::MissingOutputPv(output.to_string()))?;
        receiver.subscribe_to(input)?;
        info!("Subscribed {} to {}", output, input);
        Ok(())
    }

    pub fn unsubscribe(&self, input: &str, output: &str) -> KernelResult<()> {
        let receiver = self
            .output(output)
            .ok_or_else(|| WiringError::MissingOutputPv(output.to_string()))?;
        receiver.unsubscribe_from(input)?;
        info!("Unsubscribed {} from {}", output, input);
        Ok(())
    }

    /// Push every value forwarded by `source` into `destination` too.
    ///
    /// # Errors
    ///
    /// `MissingDestinationPv` / `MissingInputPv` when a name does not resolve.
    pub fn replicate(&self, source: &str, destination: &str) -> KernelResult<()> {
        let target = self
            .input(destination)
            .ok_or_else(|| WiringError::MissingDestinationPv(destination.to_string()))?;
        target.replicate_from(source)?;
        info!("Replicating {} into {}", source, destination);
        Ok(())
    }

    pub fn stop_replication(&self, source: &str, destination: &str) -> KernelResult<()> {
        let target = self
            .input(destination)
            .ok_or_else(|| WiringError::MissingDestinationPv(destination.to_string()))?;
        target.stop_replication_from(source)?;
        info!("Stopped replicating {} into {}", source, destination);
        Ok(())
    }

    // ─── Commands and values ────────────────────────────────────────

    /// Run a command defined on `component`.
    ///
    /// # Errors
    ///
    /// - `UnknownComponent` when `component` defines no commands
    /// - `UnknownCommand` when it does not define `command`
    /// - `WrongArity` on a parameter count mismatch
    /// - whatever the handler returns
    pub fn run_command(&self, component: &str, command: &str, args: &[String]) -> KernelResult<Vec<String>> {
        let definition = {
            let commands = self.commands.read();
            let table = commands
                .get(component)
                .ok_or_else(|| WiringError::UnknownComponent(component.to_string()))?;
            table
                .get(command)
                .cloned()
                .ok_or_else(|| WiringError::UnknownCommand {
                    component: component.to_string(),
                    command: command.to_string(),
                })?
        };
        if args.len() != definition.arity {
            return Err(WiringError::WrongArity {
                command: command.to_string(),
                expected: definition.arity,
                actual: args.len(),
            }
            .into());
        }
        info!("Running {} on {} {:?}", command, component, args);
        (definition.handler)(args)
    }

    /// Write `value` to an output PV, stamped with the PV's own timestamp.
    pub fn write(&self, output: &str, value: Value) -> KernelResult<()> {
        let pv = self
            .output(output)
            .ok_or_else(|| WiringError::MissingOutputPv(output.to_string()))?;
        pv.write(pv.timestamp(), value)
    }

    /// Snapshot of registrations, machine states and last pushes.
    pub fn status_json(&self) -> serde_json::Value {
        let components: BTreeMap<String, &'static str> = self
            .components
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.kind))
            .collect();
        let states: BTreeMap<String, State> = self
            .states
            .lock()
            .iter()
            .map(|(name, (state, _))| (name.clone(), *state))
            .collect();
        let pushes: BTreeMap<String, PushRecord> = self
            .pushes
            .lock()
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect();
        serde_json::json!({
            "components": components,
            "states": states,
            "pushes": pushes,
        })
    }

    fn define_write_command(&self, pv: &Arc<OutputPv>) {
        let weak = Arc::downgrade(pv);
        let usage = format!("write <{}>", pv.value_type());
        let definition = CommandDefinition::new("write", usage, 1, move |args| {
            let pv = weak.upgrade().ok_or(TreeError::Detached)?;
            let value = parse_value(pv.value_type(), &args[0])?;
            pv.write(pv.timestamp(), value)?;
            Ok(Vec::new())
        });
        self.commands
            .write()
            .entry(pv.full_name())
            .or_default()
            .insert(definition.name.clone(), definition);
    }
}

impl ControlSystem for LocalControlSystem {
    fn initialize(&self, component: ComponentRef<'_>) -> KernelResult<()> {
        let name = component.full_name();
        {
            let mut components = self.components.write();
            if components.contains_key(&name) {
                return Err(TreeError::NameAlreadyDeclared(name).into());
            }
            components.insert(name.clone(), Entry::new(component));
        }
        if let ComponentRef::Output(pv) = component {
            self.define_write_command(pv);
        }
        debug!("Registered {:?}", component);
        Ok(())
    }

    fn deinitialize(&self, component: ComponentRef<'_>) {
        let name = component.full_name();
        {
            let mut components = self.components.write();
            if !components.get(&name).is_some_and(|e| e.refers_to(component)) {
                warn!("Ignoring deregistration of {:?}: not registered by it", component);
                return;
            }
            components.remove(&name);
        }
        self.commands.write().remove(&name);
        self.pushes.lock().remove(&name);
        self.states.lock().remove(&name);
        debug!("Deregistered {:?}", component);
    }

    fn push(&self, pv: &InputPv, timestamp: Timestamp, value: &Value, status: PvStatus) {
        let name = pv.full_name();
        let mut pushes = self.pushes.lock();
        let count = pushes.get(&name).map_or(0, |r| r.count) + 1;
        pushes.insert(
            name,
            PushRecord {
                timestamp,
                value: value.clone(),
                status,
                count,
            },
        );
    }

    fn find_input_pv(&self, full_name: &str) -> Option<Arc<InputPv>> {
        self.input(full_name)
    }

    /// # Errors
    ///
    /// `UnknownComponent` when no component is registered as `component`.
    fn define_command(&self, component: &str, command: CommandDefinition) -> KernelResult<()> {
        if !self.is_registered(component) {
            return Err(WiringError::UnknownComponent(component.to_string()).into());
        }
        debug!("Command {} defined on {}", command.name, component);
        self.commands
            .write()
            .entry(component.to_string())
            .or_default()
            .insert(command.name.clone(), command);
        Ok(())
    }

    fn state_changed(&self, machine: &StateMachine, state: State, timestamp: Timestamp) {
        let name = machine.full_name();
        info!(machine = %name, "State {}", state);
        self.states.lock().insert(name, (state, timestamp));
    }
}

// ─── Value parsing ──────────────────────────────────────────────────

/// Parse a command-line value of the given type.
///
/// Arrays are comma separated; timestamps are whole seconds.
pub fn parse_value(value_type: ValueType, text: &str) -> Result<Value, WiringError> {
    fn one<T: FromStr>(text: &str, value_type: ValueType) -> Result<T, WiringError> {
        text.trim()
            .parse()
            .map_err(|_| WiringError::InvalidParameter(format!("'{text}' is not a valid {value_type}")))
    }

    fn many<T: FromStr>(text: &str, value_type: ValueType) -> Result<Vec<T>, WiringError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        text.split(',').map(|item| one(item, value_type)).collect()
    }

    let seconds = |secs: i64| Timestamp::from_secs_nanos(secs, 0);

    Ok(match value_type {
        ValueType::Int8 => Value::Int8(one(text, value_type)?),
        ValueType::Int16 => Value::Int16(one(text, value_type)?),
        ValueType::Int32 => Value::Int32(one(text, value_type)?),
        ValueType::Int64 => Value::Int64(one(text, value_type)?),
        ValueType::Float32 => Value::Float32(one(text, value_type)?),
        ValueType::Float64 => Value::Float64(one(text, value_type)?),
        ValueType::Int8Array => Value::Int8Array(many(text, value_type)?),
        ValueType::UInt8Array => Value::UInt8Array(many(text, value_type)?),
        ValueType::Int16Array => Value::Int16Array(many(text, value_type)?),
        ValueType::UInt16Array => Value::UInt16Array(many(text, value_type)?),
        ValueType::Int32Array => Value::Int32Array(many(text, value_type)?),
        ValueType::UInt32Array => Value::UInt32Array(many(text, value_type)?),
        ValueType::Int64Array => Value::Int64Array(many(text, value_type)?),
        ValueType::Float32Array => Value::Float32Array(many(text, value_type)?),
        ValueType::Float64Array => Value::Float64Array(many(text, value_type)?),
        ValueType::BoolArray => Value::BoolArray(many(text, value_type)?),
        ValueType::String => Value::String(text.to_string()),
        ValueType::Timestamp => Value::Timestamp(seconds(one(text, value_type)?)),
        ValueType::TimestampArray => Value::TimestampArray(
            many::<i64>(text, value_type)?
                .into_iter()
                .map(seconds)
                .collect(),
        ),
    })
}
