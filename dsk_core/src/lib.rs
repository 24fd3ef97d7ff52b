//! DSK Core - device-support kernel.
//!
//! Builds a device as a tree of nodes holding process variables (PVs) and
//! at most one lifecycle state machine per node, and moves values between
//! PVs with decimation, subscription and replication.
//!
//! # Module Structure
//!
//! - [`component`] - Name, parent link, timestamp and log gate shared by all components
//! - [`control_system`] - Adapter trait the surrounding control system implements
//! - [`node`] - Component tree, child handles, state aggregation
//! - [`state_machine`] - Lifecycle automaton and device delegates
//! - [`pv`] - Input/output PVs and the data-flow engine
//! - [`scheduling`] - Trigger-driven processing nodes and the multiplexer
//! - [`sync`] - Re-entrant lock with hold depth
//!
//! # Example
//!
//! ```rust
//! use dsk_core::prelude::*;
//!
//! let root = Node::new("dev");
//! let out = root.add_child(InputPv::new("Temperature", ValueType::Float64)).unwrap();
//! root.add_child(StateMachine::new(false, StateHandlers::default())).unwrap();
//!
//! out.upgrade().unwrap().push(Timestamp::now(), Value::Float64(21.5)).unwrap();
//! assert_eq!(root.local_state().0, State::Off);
//! ```

pub mod component;
pub mod control_system;
pub mod node;
pub mod prelude;
pub mod pv;
pub mod scheduling;
pub mod state_machine;
pub mod sync;
