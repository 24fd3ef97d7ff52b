//! Prelude module for common re-exports.
//!
//! `use dsk_core::prelude::*;` gives device code everything it needs to
//! build a tree, plus the shared types from `dsk_common`.

pub use dsk_common::prelude::*;

// ─── Tree ───────────────────────────────────────────────────────────
pub use crate::component::{Component, ComponentCore, TimestampDelegate};
pub use crate::node::{Attachable, Child, Handle, Node};

// ─── Lifecycle ──────────────────────────────────────────────────────
pub use crate::state_machine::{StateHandlers, StateMachine};

// ─── Data flow ──────────────────────────────────────────────────────
pub use crate::pv::{InputPv, OutputPv, PvMetadata, ScanType};
pub use crate::scheduling::{Multiplexer, SchedulingNode};

// ─── Adapter ────────────────────────────────────────────────────────
pub use crate::control_system::{CommandDefinition, ComponentRef, ControlSystem};
