//! Prelude module for common re-exports.
//!
//! `use dsk_common::prelude::*;` brings in the types every device and
//! adapter touches.

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    CommandConfig, ConfigError, ConfigLoader, DeviceConfig, HostConfig, LinkConfig, SharedConfig,
};

// ─── Values ─────────────────────────────────────────────────────────
pub use crate::value::{PvStatus, Timestamp, Value, ValueType};

// ─── Lifecycle ──────────────────────────────────────────────────────
pub use crate::state::{AutoEnable, State};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{
    DelegateError, KernelError, KernelResult, ProcessingError, PvError, Recovery,
    StateMachineError, TreeError, WiringError,
};
