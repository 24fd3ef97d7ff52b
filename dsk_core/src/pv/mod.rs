//! Process variables and the data-flow engine.
//!
//! # Module Structure
//!
//! - [`input`] - [`InputPv`]: device → control system, with decimation,
//!   subscription and replication fan-out
//! - [`output`] - [`OutputPv`]: control system → device, with write and
//!   initializer delegates
//! - `fanout` - subscriber / replica sets with deferred removal

mod fanout;
pub mod input;
pub mod output;

pub use input::InputPv;
pub use output::{InitDelegate, OutputPv, WriteDelegate};

use dsk_common::error::PvError;
use dsk_common::value::{Value, ValueType};
use serde::Serialize;
use std::time::Duration;

/// How the control system refreshes a PV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ScanType {
    /// Read on request only.
    #[default]
    Passive,
    /// Polled at a fixed period.
    Periodic(Duration),
    /// Refreshed whenever the device pushes.
    Interrupt,
}

/// Static description of a PV, set once before `initialize`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PvMetadata {
    pub description: String,
    pub scan: ScanType,
    /// Largest accepted array length; `None` means unbounded.
    pub max_elements: Option<usize>,
    /// Labels for enumerated integer PVs.
    pub enumeration: Vec<String>,
}

impl PvMetadata {
    pub fn interrupt() -> Self {
        Self {
            scan: ScanType::Interrupt,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_elements(mut self, max: usize) -> Self {
        self.max_elements = Some(max);
        self
    }
}

/// Check a value against a PV's type and element limit.
pub(crate) fn validate(
    pv: &str,
    expected: ValueType,
    metadata: &PvMetadata,
    value: &Value,
) -> Result<(), PvError> {
    let actual = value.value_type();
    if actual != expected {
        return Err(PvError::TypeMismatch {
            pv: pv.to_string(),
            expected,
            actual,
        });
    }
    if let Some(max) = metadata.max_elements
        && value.element_count() > max
    {
        return Err(PvError::TooManyElements {
            pv: pv.to_string(),
            max,
            actual: value.element_count(),
        });
    }
    Ok(())
}
