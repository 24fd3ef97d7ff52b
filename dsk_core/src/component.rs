//! State shared by every component of the tree.
//!
//! Nodes, PVs and state machines each embed a [`ComponentCore`]: the local
//! name, the back-reference to the owning node, an optional timestamp
//! delegate, the per-component log gate and the adapter binding installed
//! by `initialize`.

use dsk_common::config::LogLevel;
use dsk_common::value::Timestamp;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crate::control_system::ControlSystem;
use crate::node::Node;

/// Produces the timestamp attached to values and state changes.
pub type TimestampDelegate = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Emit a `tracing` event for a component, gated by its log level.
///
/// The component's full name is attached as the `component` field.
macro_rules! component_event {
    ($core:expr, error, $($arg:tt)+) => {
        if $core.log_enabled(::dsk_common::config::LogLevel::Error) {
            let component = $core.full_name();
            ::tracing::error!(component = %component, $($arg)+);
        }
    };
    ($core:expr, warn, $($arg:tt)+) => {
        if $core.log_enabled(::dsk_common::config::LogLevel::Warn) {
            let component = $core.full_name();
            ::tracing::warn!(component = %component, $($arg)+);
        }
    };
    ($core:expr, info, $($arg:tt)+) => {
        if $core.log_enabled(::dsk_common::config::LogLevel::Info) {
            let component = $core.full_name();
            ::tracing::info!(component = %component, $($arg)+);
        }
    };
    ($core:expr, debug, $($arg:tt)+) => {
        if $core.log_enabled(::dsk_common::config::LogLevel::Debug) {
            let component = $core.full_name();
            ::tracing::debug!(component = %component, $($arg)+);
        }
    };
}
pub(crate) use component_event;

/// Names cached while the component is initialized.
#[derive(Debug, Clone)]
struct CachedNames {
    full: String,
    from_port: String,
}

/// Common component state.
pub struct ComponentCore {
    name: String,
    parent: RwLock<Weak<Node>>,
    timestamp_delegate: RwLock<Option<TimestampDelegate>>,
    log_level: AtomicU8,
    names: RwLock<Option<CachedNames>>,
    control_system: RwLock<Option<Arc<dyn ControlSystem>>>,
}

impl ComponentCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: RwLock::new(Weak::new()),
            timestamp_delegate: RwLock::new(None),
            log_level: AtomicU8::new(LogLevel::default() as u8),
            names: RwLock::new(None),
            control_system: RwLock::new(None),
        }
    }

    /// Local name, unique among siblings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning node, if attached and still alive.
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.read().upgrade()
    }

    pub(crate) fn has_parent(&self) -> bool {
        self.parent.read().strong_count() > 0
    }

    pub(crate) fn set_parent(&self, parent: Weak<Node>) {
        *self.parent.write() = parent;
    }

    // ─── Timestamps ─────────────────────────────────────────────────

    /// Install a delegate that overrides the timestamp source.
    pub fn set_timestamp_delegate(&self, delegate: TimestampDelegate) {
        *self.timestamp_delegate.write() = Some(delegate);
    }

    /// Delegate if set, else the parent's timestamp, else the wall clock.
    pub fn timestamp(&self) -> Timestamp {
        if let Some(delegate) = self.timestamp_delegate.read().clone() {
            return delegate();
        }
        match self.parent() {
            Some(parent) => parent.timestamp(),
            None => Timestamp::now(),
        }
    }

    // ─── Logging ────────────────────────────────────────────────────

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.log_level.load(Ordering::Relaxed))
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.log_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn log_enabled(&self, level: LogLevel) -> bool {
        self.log_level().allows(level)
    }

    // ─── Naming ─────────────────────────────────────────────────────

    /// Root-to-component path: `root-child.grandchild`.
    pub fn full_name(&self) -> String {
        match &*self.names.read() {
            Some(names) => names.full.clone(),
            None => self.compute_names().full,
        }
    }

    /// Path below the nearest ancestor port. Equals [`full_name`] when no
    /// ancestor is a port.
    ///
    /// [`full_name`]: Self::full_name
    pub fn full_name_from_port(&self) -> String {
        match &*self.names.read() {
            Some(names) => names.from_port.clone(),
            None => self.compute_names().from_port,
        }
    }

    fn compute_names(&self) -> CachedNames {
        // Leaf first; reversed below.
        let mut segments = vec![self.name.clone()];
        let mut below_port = None;
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            if below_port.is_none() && node.is_port() {
                below_port = Some(segments.len());
            }
            segments.push(node.name().to_string());
            cursor = node.core().parent();
        }
        segments.reverse();

        let full = join_path(&segments);
        let from_port = match below_port {
            Some(count) => segments[segments.len() - count..].join("."),
            None => full.clone(),
        };
        CachedNames { full, from_port }
    }

    // ─── Adapter binding ────────────────────────────────────────────

    /// Adapter installed by `initialize`.
    pub fn control_system(&self) -> Option<Arc<dyn ControlSystem>> {
        self.control_system.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.control_system.read().is_some()
    }

    pub(crate) fn bind(&self, control_system: Arc<dyn ControlSystem>) {
        *self.names.write() = Some(self.compute_names());
        *self.control_system.write() = Some(control_system);
    }

    pub(crate) fn unbind(&self) {
        *self.control_system.write() = None;
        *self.names.write() = None;
    }
}

impl std::fmt::Debug for ComponentCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentCore")
            .field("name", &self.name)
            .field("log_level", &self.log_level())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// First level joined with `-`, deeper levels with `.`.
fn join_path(segments: &[String]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        match i {
            0 => {}
            1 => out.push('-'),
            _ => out.push('.'),
        }
        out.push_str(segment);
    }
    out
}

/// Anything that can live in the component tree.
pub trait Component: Send + Sync {
    fn core(&self) -> &ComponentCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn full_name(&self) -> String {
        self.core().full_name()
    }

    fn full_name_from_port(&self) -> String {
        self.core().full_name_from_port()
    }

    fn timestamp(&self) -> Timestamp {
        self.core().timestamp()
    }

    fn set_log_level(&self, level: LogLevel) {
        self.core().set_log_level(level);
    }
}
