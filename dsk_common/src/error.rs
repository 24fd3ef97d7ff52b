//! Error taxonomy of the kernel.
//!
//! One enum per concern, gathered under [`KernelError`] so operations that
//! touch several concerns can use `?` throughout.

use thiserror::Error;

use crate::config::ConfigError;
use crate::state::State;
use crate::value::ValueType;

/// Errors raised while building or initializing the component tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// A sibling with the same name already exists.
    #[error("Name already declared: {0}")]
    NameAlreadyDeclared(String),

    /// Operation only valid on a root node.
    #[error("Node {0} is not a root node")]
    NotRoot(String),

    /// The node already owns a state machine.
    #[error("Node {0} already has a state machine")]
    StateMachineAlreadyAttached(String),

    /// The component being added already has a parent.
    #[error("Component {0} is already attached to a parent")]
    AlreadyAttached(String),

    /// Initialize called twice on the same root.
    #[error("Node {0} is already initialized")]
    AlreadyInitialized(String),

    /// The operation needs an initialized tree.
    #[error("Component {0} is not initialized")]
    NotInitialized(String),

    /// A handle outlived the component it pointed to.
    #[error("Component no longer exists")]
    Detached,
}

/// Errors raised by state-machine transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    /// The requested transition is not in the table.
    #[error("No transition from {from} to {to}")]
    NoSuchTransition { from: State, to: State },

    /// `allowChange` refused the transition.
    #[error("Transition from {from} to {to} denied")]
    TransitionDenied { from: State, to: State },

    /// A transition is already running.
    #[error("Transition already in progress (current state {0})")]
    Busy(State),

    /// Transitional states cannot be requested directly.
    #[error("Cannot request intermediate state {0}")]
    IntermediateState(State),

    /// A delegate failed; the machine moved to fault.
    #[error("Transition to {target} failed: {reason}")]
    Lifecycle { target: State, reason: String },
}

/// Errors raised by PV reads, writes and pushes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PvError {
    /// Value type does not match the PV type.
    #[error("PV {pv} expects {expected}, got {actual}")]
    TypeMismatch {
        pv: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// Array longer than the declared maximum.
    #[error("PV {pv} accepts at most {max} elements, got {actual}")]
    TooManyElements { pv: String, max: usize, actual: usize },

    /// The write delegate refused the value.
    #[error("Write to {pv} failed: {reason}")]
    WriteFailed { pv: String, reason: String },

    /// The PV cannot be written from outside.
    #[error("PV {0} is read-only")]
    ReadOnly(String),
}

/// Errors raised while wiring PVs, dispatching commands or managing devices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WiringError {
    /// No input PV with that full name.
    #[error("Input PV not found: {0}")]
    MissingInputPv(String),

    /// No output PV with that full name.
    #[error("Output PV not found: {0}")]
    MissingOutputPv(String),

    /// Replication destination not found.
    #[error("Destination PV not found: {0}")]
    MissingDestinationPv(String),

    /// No component with that full name.
    #[error("Component not found: {0}")]
    UnknownComponent(String),

    /// The component does not define that command.
    #[error("Command {command} not defined on {component}")]
    UnknownCommand { component: String, command: String },

    /// Command called with the wrong number of parameters.
    #[error("Command {command} expects {expected} parameters, got {actual}")]
    WrongArity {
        command: String,
        expected: usize,
        actual: usize,
    },

    /// A parameter could not be interpreted.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A device with that name already exists.
    #[error("Device already created: {0}")]
    DeviceAlreadyCreated(String),

    /// No device with that name exists.
    #[error("Device not allocated: {0}")]
    DeviceNotAllocated(String),

    /// No factory registered for that device type.
    #[error("Device type not found: {0}")]
    DeviceTypeNotFound(String),

    /// A factory for that device type already exists.
    #[error("Device type already registered: {0}")]
    DeviceTypeAlreadyRegistered(String),
}

/// Errors raised by a scheduling node's action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    /// An input holds fewer samples than configured.
    #[error("Input {input} holds {available} samples, {samples} required (samples > len)")]
    ShortInput {
        input: String,
        samples: usize,
        available: usize,
    },

    /// The node has no output to publish on.
    #[error("Node {0} has no output PV")]
    MissingOutput(String),
}

/// Umbrella error for kernel operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    Pv(#[from] PvError),

    #[error(transparent)]
    Wiring(#[from] WiringError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias used across the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// Failure reported by a device delegate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DelegateError(pub String);

impl From<String> for DelegateError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for DelegateError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<KernelError> for DelegateError {
    fn from(err: KernelError) -> Self {
        Self(err.to_string())
    }
}

/// Outcome of a `recover` delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Recovery {
    /// Recovery succeeded, the machine moves to `Off`.
    #[default]
    Recovered,
    /// Recovery declined, the machine stays in `Fault`.
    StayFaulted,
}

// ─── Tests ──────────────────────────────────────────────────────────
