//! DSK Common Library
//!
//! Shared value model, lifecycle states, error taxonomy and configuration
//! loading for all DSK workspace crates.
//!
//! # Module Structure
//!
//! - [`value`] - Timestamps, PV value types and statuses
//! - [`state`] - Lifecycle states, aggregation order, auto-enable policy
//! - [`error`] - Error enums per concern and the `KernelError` umbrella
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use dsk_common::prelude::*;
//!
//! let v = Value::Int32Array(vec![1, 2, 3]);
//! assert_eq!(v.element_count(), 3);
//! assert!(State::Fault.rank() > State::Running.rank());
//! ```

pub mod config;
pub mod error;
pub mod prelude;
pub mod state;
pub mod value;
