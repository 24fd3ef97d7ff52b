//! Output PVs: values flowing from the control system to the device.

use dsk_common::error::{DelegateError, KernelResult, PvError, WiringError};
use dsk_common::value::{Timestamp, Value, ValueType};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::component::{Component, ComponentCore, component_event};
use crate::control_system::{ComponentRef, ControlSystem};
use crate::pv::{PvMetadata, validate};

/// Called with every accepted write.
pub type WriteDelegate = Arc<dyn Fn(Timestamp, &Value) -> Result<(), DelegateError> + Send + Sync>;

/// Seeds the readback once at `initialize`.
pub type InitDelegate = Arc<dyn Fn() -> Result<(Timestamp, Value), DelegateError> + Send + Sync>;

/// A value written by the control system or by a subscription.
///
/// Without a write delegate the PV is a plain variable: writes only update
/// the readback.
pub struct OutputPv {
    core: ComponentCore,
    value_type: ValueType,
    metadata: RwLock<PvMetadata>,
    readback: Mutex<(Timestamp, Value)>,
    on_write: Option<WriteDelegate>,
    initializer: Option<InitDelegate>,
}

impl OutputPv {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            core: ComponentCore::new(name),
            value_type,
            metadata: RwLock::new(PvMetadata::default()),
            readback: Mutex::new((Timestamp::ZERO, Value::default_for(value_type))),
            on_write: None,
            initializer: None,
        }
    }

    pub fn with_write(
        mut self,
        delegate: impl Fn(Timestamp, &Value) -> Result<(), DelegateError> + Send + Sync + 'static,
    ) -> Self {
        self.on_write = Some(Arc::new(delegate));
        self
    }

    pub fn with_initializer(
        mut self,
        delegate: impl Fn() -> Result<(Timestamp, Value), DelegateError> + Send + Sync + 'static,
    ) -> Self {
        self.initializer = Some(Arc::new(delegate));
        self
    }

    pub fn with_metadata(self, metadata: PvMetadata) -> Self {
        *self.metadata.write() = metadata;
        self
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn metadata(&self) -> PvMetadata {
        self.metadata.read().clone()
    }

    pub fn is_variable(&self) -> bool {
        self.on_write.is_none()
    }

    /// Validate, hand to the write delegate, then store as readback.
    ///
    /// # Errors
    ///
    /// - `PvError::TypeMismatch` / `PvError::TooManyElements` on a bad value
    /// - `PvError::WriteFailed` when the delegate refuses; the readback is
    ///   left unchanged
    pub fn write(&self, timestamp: Timestamp, value: Value) -> KernelResult<()> {
        validate(&self.core.full_name(), self.value_type, &self.metadata.read(), &value)?;

        if let Some(delegate) = &self.on_write
            && let Err(err) = delegate(timestamp, &value)
        {
            component_event!(self.core, warn, "Write rejected: {}", err);
            return Err(PvError::WriteFailed {
                pv: self.core.full_name(),
                reason: err.0,
            }
            .into());
        }

        *self.readback.lock() = (timestamp, value);
        Ok(())
    }

    /// Last accepted value and its timestamp.
    pub fn read(&self) -> (Timestamp, Value) {
        self.readback.lock().clone()
    }

    /// Subscribe to the input PV named `input`.
    pub fn subscribe_to(self: &Arc<Self>, input: &str) -> KernelResult<()> {
        let cs = self.bound_control_system()?;
        let source = cs
            .find_input_pv(input)
            .ok_or_else(|| WiringError::MissingInputPv(input.to_string()))?;
        source.subscribe_receiver(self);
        Ok(())
    }

    /// Undo [`subscribe_to`](Self::subscribe_to).
    pub fn unsubscribe_from(self: &Arc<Self>, input: &str) -> KernelResult<()> {
        let cs = self.bound_control_system()?;
        let source = cs
            .find_input_pv(input)
            .ok_or_else(|| WiringError::MissingInputPv(input.to_string()))?;
        source.unsubscribe_receiver(self);
        Ok(())
    }

    fn bound_control_system(&self) -> KernelResult<Arc<dyn ControlSystem>> {
        self.core.control_system().ok_or_else(|| {
            dsk_common::error::TreeError::NotInitialized(self.core.full_name()).into()
        })
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Register with `cs`, then seed the readback from the initializer.
    pub(crate) fn register(self: &Arc<Self>, cs: &Arc<dyn ControlSystem>) -> KernelResult<()> {
        cs.initialize(ComponentRef::Output(self))?;
        self.core.bind(Arc::clone(cs));
        if let Some(init) = &self.initializer {
            match init() {
                Ok((timestamp, value)) => {
                    validate(&self.core.full_name(), self.value_type, &self.metadata.read(), &value)?;
                    *self.readback.lock() = (timestamp, value);
                }
                Err(err) => {
                    component_event!(self.core, warn, "Initializer failed: {}", err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn deinitialize(self: &Arc<Self>) {
        if let Some(cs) = self.core.control_system() {
            cs.deinitialize(ComponentRef::Output(self));
        }
        self.core.unbind();
    }
}

impl Component for OutputPv {
    fn core(&self) -> &ComponentCore {
        &self.core
    }
}

impl std::fmt::Debug for OutputPv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPv")
            .field("name", &self.core.name())
            .field("value_type", &self.value_type)
            .field("variable", &self.is_variable())
            .finish_non_exhaustive()
    }
}
