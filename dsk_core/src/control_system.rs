//! Interface between the kernel and the surrounding control system.
//!
//! The kernel never talks to a concrete control system. A binding
//! implements [`ControlSystem`] and is handed to the root node's
//! `initialize`; every component keeps the same `Arc` until `deinitialize`.

use dsk_common::error::KernelResult;
use dsk_common::state::State;
use dsk_common::value::{PvStatus, Timestamp, Value};
use std::fmt;
use std::sync::Arc;

use crate::component::{Component, ComponentCore};
use crate::node::Node;
use crate::pv::{InputPv, OutputPv};
use crate::state_machine::StateMachine;

/// Borrowed reference to any component, as handed to the adapter.
#[derive(Clone, Copy)]
pub enum ComponentRef<'a> {
    Node(&'a Arc<Node>),
    Input(&'a Arc<InputPv>),
    Output(&'a Arc<OutputPv>),
    StateMachine(&'a Arc<StateMachine>),
}

impl ComponentRef<'_> {
    pub fn core(&self) -> &ComponentCore {
        match self {
            Self::Node(n) => n.core(),
            Self::Input(pv) => pv.core(),
            Self::Output(pv) => pv.core(),
            Self::StateMachine(sm) => sm.core(),
        }
    }

    pub fn full_name(&self) -> String {
        self.core().full_name()
    }

    /// Short kind label used in logs and status dumps.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Node(_) => "node",
            Self::Input(_) => "input_pv",
            Self::Output(_) => "output_pv",
            Self::StateMachine(_) => "state_machine",
        }
    }
}

impl fmt::Debug for ComponentRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.full_name())
    }
}

/// Handler behind a named command. Receives positional string parameters.
pub type CommandHandler = Arc<dyn Fn(&[String]) -> KernelResult<Vec<String>> + Send + Sync>;

/// A command a component exposes to external tooling.
#[derive(Clone)]
pub struct CommandDefinition {
    pub name: String,
    pub usage: String,
    pub arity: usize,
    pub handler: CommandHandler,
}

impl CommandDefinition {
    pub fn new(
        name: impl Into<String>,
        usage: impl Into<String>,
        arity: usize,
        handler: impl Fn(&[String]) -> KernelResult<Vec<String>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            usage: usage.into(),
            arity,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Services a control-system binding provides to the kernel.
pub trait ControlSystem: Send + Sync {
    /// Register a component. Called once per component during the root's
    /// `initialize`, children before their parent. A component whose
    /// registration fails is never bound, deinitialized or given commands.
    fn initialize(&self, component: ComponentRef<'_>) -> KernelResult<()>;

    /// Deregister a component this adapter accepted in `initialize`.
    fn deinitialize(&self, component: ComponentRef<'_>);

    /// Deliver a forwarded input-PV value.
    fn push(&self, pv: &InputPv, timestamp: Timestamp, value: &Value, status: PvStatus);

    /// Resolve an input PV by full name.
    fn find_input_pv(&self, full_name: &str) -> Option<Arc<InputPv>>;

    /// Expose a command on the component named `component`. Called once
    /// the whole tree is registered.
    fn define_command(&self, component: &str, command: CommandDefinition) -> KernelResult<()>;

    /// A state machine committed a new state.
    fn state_changed(&self, _machine: &StateMachine, _state: State, _timestamp: Timestamp) {}
}
