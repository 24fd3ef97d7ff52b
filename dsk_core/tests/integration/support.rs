//! Recording adapter and tree helpers shared by the integration tests.

use dsk_core::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Adapter that records everything the kernel tells it.
#[derive(Default)]
pub struct Recorder {
    registered: Mutex<Vec<String>>,
    inputs: Mutex<HashMap<String, Weak<InputPv>>>,
    pushes: Mutex<Vec<(String, Timestamp, Value)>>,
    commands: Mutex<HashMap<(String, String), CommandDefinition>>,
    states: Mutex<Vec<(String, State)>>,
    rejected: Mutex<Option<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse to register the component with this full name.
    pub fn reject(&self, name: &str) {
        *self.rejected.lock() = Some(name.to_string());
    }

    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().clone()
    }

    /// Values forwarded for the PV with this full name, in order.
    pub fn pushes_of(&self, name: &str) -> Vec<(Timestamp, Value)> {
        self.pushes
            .lock()
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, ts, v)| (*ts, v.clone()))
            .collect()
    }

    pub fn states_of(&self, name: &str) -> Vec<State> {
        self.states
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn has_command(&self, component: &str, command: &str) -> bool {
        self.commands
            .lock()
            .contains_key(&(component.to_string(), command.to_string()))
    }

    pub fn run(&self, component: &str, command: &str, args: &[&str]) -> KernelResult<Vec<String>> {
        let definition = self
            .commands
            .lock()
            .get(&(component.to_string(), command.to_string()))
            .cloned()
            .ok_or_else(|| WiringError::UnknownCommand {
                component: component.to_string(),
                command: command.to_string(),
            })?;
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        (definition.handler)(&args)
    }
}

impl ControlSystem for Recorder {
    fn initialize(&self, component: ComponentRef<'_>) -> KernelResult<()> {
        let name = component.full_name();
        if self.rejected.lock().as_deref() == Some(name.as_str()) {
            return Err(TreeError::NameAlreadyDeclared(name).into());
        }
        if let ComponentRef::Input(pv) = component {
            self.inputs.lock().insert(name.clone(), Arc::downgrade(pv));
        }
        self.registered.lock().push(name);
        Ok(())
    }

    fn deinitialize(&self, component: ComponentRef<'_>) {
        let name = component.full_name();
        self.inputs.lock().remove(&name);
        self.registered.lock().retain(|n| *n != name);
    }

    fn push(&self, pv: &InputPv, timestamp: Timestamp, value: &Value, _status: PvStatus) {
        self.pushes
            .lock()
            .push((pv.full_name(), timestamp, value.clone()));
    }

    fn find_input_pv(&self, full_name: &str) -> Option<Arc<InputPv>> {
        self.inputs.lock().get(full_name).and_then(Weak::upgrade)
    }

    fn define_command(&self, component: &str, command: CommandDefinition) -> KernelResult<()> {
        self.commands
            .lock()
            .insert((component.to_string(), command.name.clone()), command);
        Ok(())
    }

    fn state_changed(&self, machine: &StateMachine, state: State, _timestamp: Timestamp) {
        self.states.lock().push((machine.full_name(), state));
    }
}

/// Install a clock that advances one second per reading.
pub fn ticking_clock(node: &Node) -> Arc<AtomicI64> {
    let tick = Arc::new(AtomicI64::new(1));
    let clock = Arc::clone(&tick);
    node.set_timestamp_delegate(Arc::new(move || {
        Timestamp::from_secs_nanos(clock.fetch_add(1, Ordering::SeqCst), 0)
    }));
    tick
}

/// Attach a child node with a synchronous state machine.
pub fn machine_node(
    parent: &Arc<Node>,
    name: &str,
    handlers: StateHandlers,
    auto_enable: AutoEnable,
) -> (Arc<Node>, Arc<StateMachine>) {
    let node = parent.add_child(Node::new(name)).unwrap().upgrade().unwrap();
    let sm = node
        .add_child(StateMachine::new(false, handlers).with_auto_enable(auto_enable))
        .unwrap()
        .upgrade()
        .unwrap();
    (node, sm)
}

/// Poll `condition` until it holds; panics after about two seconds.
pub fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("condition not reached in time");
}
