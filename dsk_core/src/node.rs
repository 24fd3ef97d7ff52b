//! Component tree and state aggregation.
//!
//! A [`Node`] owns its children (`Arc`) and each child keeps a `Weak`
//! back-reference to it. Device code receives a non-owning [`Handle`] for
//! every attached child, so dropping the root tears down the whole tree.

use dsk_common::config::LogLevel;
use dsk_common::error::{KernelError, KernelResult, TreeError, WiringError};
use dsk_common::state::{AutoEnable, State};
use dsk_common::value::Timestamp;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::component::{Component, ComponentCore, TimestampDelegate, component_event};
use crate::control_system::{CommandDefinition, ComponentRef, ControlSystem};
use crate::pv::{InputPv, OutputPv};
use crate::state_machine::StateMachine;

// ─── Children ───────────────────────────────────────────────────────

/// A child owned by a node.
#[derive(Debug, Clone)]
pub enum Child {
    Node(Arc<Node>),
    Input(Arc<InputPv>),
    Output(Arc<OutputPv>),
    StateMachine(Arc<StateMachine>),
}

impl Child {
    pub fn core(&self) -> &ComponentCore {
        match self {
            Self::Node(c) => c.core(),
            Self::Input(c) => c.core(),
            Self::Output(c) => c.core(),
            Self::StateMachine(c) => c.core(),
        }
    }

    pub fn as_node(&self) -> Option<&Arc<Node>> {
        match self {
            Self::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_input(&self) -> Option<&Arc<InputPv>> {
        match self {
            Self::Input(pv) => Some(pv),
            _ => None,
        }
    }

    pub fn as_output(&self) -> Option<&Arc<OutputPv>> {
        match self {
            Self::Output(pv) => Some(pv),
            _ => None,
        }
    }

    pub fn as_state_machine(&self) -> Option<&Arc<StateMachine>> {
        match self {
            Self::StateMachine(sm) => Some(sm),
            _ => None,
        }
    }
}

/// Something `Node::add_child` accepts.
pub trait Attachable {
    type Target: Component;

    fn into_shared(self) -> Arc<Self::Target>;

    fn wrap(target: Arc<Self::Target>) -> Child;
}

impl Attachable for InputPv {
    type Target = InputPv;

    fn into_shared(self) -> Arc<InputPv> {
        Arc::new(self)
    }

    fn wrap(target: Arc<InputPv>) -> Child {
        Child::Input(target)
    }
}

impl Attachable for OutputPv {
    type Target = OutputPv;

    fn into_shared(self) -> Arc<OutputPv> {
        Arc::new(self)
    }

    fn wrap(target: Arc<OutputPv>) -> Child {
        Child::Output(target)
    }
}

impl Attachable for StateMachine {
    type Target = StateMachine;

    fn into_shared(self) -> Arc<StateMachine> {
        Arc::new(self)
    }

    fn wrap(target: Arc<StateMachine>) -> Child {
        Child::StateMachine(target)
    }
}

impl Attachable for Arc<Node> {
    type Target = Node;

    fn into_shared(self) -> Arc<Node> {
        self
    }

    fn wrap(target: Arc<Node>) -> Child {
        Child::Node(target)
    }
}

/// Non-owning reference to a component attached to a tree.
pub struct Handle<T>(Weak<T>);

impl<T> Handle<T> {
    fn new(target: &Arc<T>) -> Self {
        Self(Arc::downgrade(target))
    }

    /// Resolve the component.
    ///
    /// # Errors
    ///
    /// `TreeError::Detached` once the owning tree has been dropped.
    pub fn upgrade(&self) -> Result<Arc<T>, TreeError> {
        self.0.upgrade().ok_or(TreeError::Detached)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Weak::clone(&self.0))
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle(alive: {})", self.is_alive())
    }
}

// ─── Node ───────────────────────────────────────────────────────────

/// Named container of PVs, at most one state machine and further nodes.
pub struct Node {
    core: ComponentCore,
    children: RwLock<BTreeMap<String, Child>>,
    port: bool,
    initialized: AtomicBool,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(name, false))
    }

    /// A node marking a communication boundary; descendants' port-relative
    /// names start below it.
    pub fn new_port(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(name, true))
    }

    fn build(name: impl Into<String>, port: bool) -> Self {
        Self {
            core: ComponentCore::new(name),
            children: RwLock::new(BTreeMap::new()),
            port,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_port(&self) -> bool {
        self.port
    }

    pub fn set_timestamp_delegate(&self, delegate: TimestampDelegate) {
        self.core.set_timestamp_delegate(delegate);
    }

    // ─── Topology ───────────────────────────────────────────────────

    /// Attach `child` and return a non-owning handle to it.
    ///
    /// # Errors
    ///
    /// - `NameAlreadyDeclared` when a sibling has the same name
    /// - `StateMachineAlreadyAttached` for a second state machine
    /// - `AlreadyAttached` when `child` already has a parent or is an
    ///   ancestor of this node
    /// - `AlreadyInitialized` once the tree is initialized
    ///
    /// On error the tree is left unmodified.
    pub fn add_child<C: Attachable>(self: &Arc<Self>, child: C) -> Result<Handle<C::Target>, TreeError> {
        let shared = child.into_shared();
        let name = shared.core().name().to_string();

        if self.core.is_initialized() || self.initialized.load(Ordering::Acquire) {
            return Err(TreeError::AlreadyInitialized(self.core.full_name()));
        }
        if shared.core().has_parent() {
            return Err(TreeError::AlreadyAttached(name));
        }

        let entry = C::wrap(Arc::clone(&shared));
        if let Child::Node(node) = &entry
            && self.has_ancestor_or_self(node)
        {
            return Err(TreeError::AlreadyAttached(name));
        }

        let mut children = self.children.write();
        if matches!(entry, Child::StateMachine(_))
            && children.values().any(|c| matches!(c, Child::StateMachine(_)))
        {
            return Err(TreeError::StateMachineAlreadyAttached(self.core.full_name()));
        }
        if children.contains_key(&name) {
            return Err(TreeError::NameAlreadyDeclared(name));
        }

        shared.core().set_parent(Arc::downgrade(self));
        children.insert(name, entry);
        Ok(Handle::new(&shared))
    }

    fn has_ancestor_or_self(self: &Arc<Self>, candidate: &Arc<Node>) -> bool {
        let mut cursor = Some(Arc::clone(self));
        while let Some(node) = cursor {
            if Arc::ptr_eq(&node, candidate) {
                return true;
            }
            cursor = node.core.parent();
        }
        false
    }

    pub fn child(&self, name: &str) -> Option<Child> {
        self.children.read().get(name).cloned()
    }

    /// Snapshot of the direct children, ordered by name.
    pub fn children(&self) -> Vec<Child> {
        self.children.read().values().cloned().collect()
    }

    pub fn child_nodes(&self) -> Vec<Arc<Node>> {
        self.children
            .read()
            .values()
            .filter_map(|c| c.as_node().cloned())
            .collect()
    }

    pub fn state_machine(&self) -> Option<Arc<StateMachine>> {
        self.children
            .read()
            .values()
            .find_map(|c| c.as_state_machine().cloned())
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    pub fn is_initialized(&self) -> bool {
        self.core.is_initialized()
    }

    /// Register the whole subtree with `cs`, children before parents, define
    /// every component's commands, then apply the auto-enable policies from
    /// the root down.
    ///
    /// # Errors
    ///
    /// - `TreeError::NotRoot` on a node with a parent
    /// - `TreeError::AlreadyInitialized` on a second call
    /// - any adapter registration error; the components this call registered
    ///   are deregistered again and nothing registered by others is touched
    pub fn initialize(self: &Arc<Self>, cs: Arc<dyn ControlSystem>) -> KernelResult<()> {
        if self.core.has_parent() {
            return Err(TreeError::NotRoot(self.core.full_name()).into());
        }
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(TreeError::AlreadyInitialized(self.core.full_name()).into());
        }

        let result = self
            .register_subtree(&cs)
            .and_then(|()| self.define_subtree_commands(&cs));
        if let Err(err) = result {
            component_event!(self.core, error, "Initialization failed: {}", err);
            self.deinitialize_subtree();
            self.initialized.store(false, Ordering::Release);
            return Err(err);
        }
        component_event!(self.core, info, "Initialized");

        self.apply_auto_enable();
        Ok(())
    }

    /// A component is bound only once the adapter accepted it.
    fn register_subtree(self: &Arc<Self>, cs: &Arc<dyn ControlSystem>) -> KernelResult<()> {
        for child in self.children() {
            match &child {
                Child::Node(node) => node.register_subtree(cs)?,
                Child::Input(pv) => pv.register(cs)?,
                Child::Output(pv) => pv.register(cs)?,
                Child::StateMachine(sm) => sm.register(cs)?,
            }
        }
        cs.initialize(ComponentRef::Node(self))?;
        self.core.bind(Arc::clone(cs));
        Ok(())
    }

    fn define_subtree_commands(self: &Arc<Self>, cs: &Arc<dyn ControlSystem>) -> KernelResult<()> {
        for child in self.children() {
            match &child {
                Child::Node(node) => node.define_subtree_commands(cs)?,
                Child::Input(pv) => pv.define_commands(cs)?,
                Child::StateMachine(sm) => sm.define_commands(cs)?,
                Child::Output(_) => {}
            }
        }

        let weak = Arc::downgrade(self);
        cs.define_command(
            &self.core.full_name(),
            CommandDefinition::new("setLogLevel", "setLogLevel <level>", 1, move |args| {
                let level: LogLevel = args[0]
                    .parse()
                    .map_err(|_| WiringError::InvalidParameter(format!("log level '{}'", args[0])))?;
                let node = weak.upgrade().ok_or(TreeError::Detached)?;
                node.set_log_level(level);
                Ok(Vec::new())
            }),
        )
    }

    /// Drive every auto-enabled state machine in the subtree to its
    /// policy's target, own machine before child nodes. Failures are logged.
    fn apply_auto_enable(&self) {
        if let Some(sm) = self.state_machine() {
            let target = match sm.auto_enable() {
                AutoEnable::None => None,
                AutoEnable::DriveToOn => Some(State::On),
                AutoEnable::DriveToRunning => Some(State::Running),
            };
            if let Some(target) = target
                && let Err(err) = sm.drive_to(target)
            {
                component_event!(self.core, warn, "Auto-enable to {} failed: {}", target, err);
            }
        }
        for node in self.child_nodes() {
            node.apply_auto_enable();
        }
    }

    /// Deregister the subtree and wait for in-flight transitions.
    ///
    /// # Errors
    ///
    /// - `TreeError::NotRoot` on a node with a parent
    /// - `TreeError::NotInitialized` when not initialized
    pub fn deinitialize(self: &Arc<Self>) -> KernelResult<()> {
        if self.core.has_parent() {
            return Err(TreeError::NotRoot(self.core.full_name()).into());
        }
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Err(TreeError::NotInitialized(self.core.full_name()).into());
        }
        self.deinitialize_subtree();
        component_event!(self.core, info, "Deinitialized");
        Ok(())
    }

    fn deinitialize_subtree(self: &Arc<Self>) {
        for child in self.children() {
            match &child {
                Child::Node(node) => node.deinitialize_subtree(),
                Child::Input(pv) => pv.deinitialize(),
                Child::Output(pv) => pv.deinitialize(),
                Child::StateMachine(sm) => sm.deinitialize(),
            }
        }
        if let Some(cs) = self.core.control_system() {
            cs.deinitialize(ComponentRef::Node(self));
        }
        self.core.unbind();
    }

    // ─── State aggregation ──────────────────────────────────────────

    /// State of this node's own machine; `Unknown` without one.
    pub fn local_state(&self) -> (State, Timestamp) {
        match self.state_machine() {
            Some(sm) => sm.get_state(),
            None => (State::Unknown, self.core.timestamp()),
        }
    }

    /// Highest state over this node's machine and every descendant's.
    pub fn global_state(&self) -> (State, Timestamp) {
        let own = self.state_machine().map(|sm| sm.get_state());
        self.child_nodes()
            .iter()
            .map(|node| node.global_state())
            .filter(|(state, _)| *state != State::Unknown)
            .chain(own)
            .max_by(|a, b| State::aggregate_cmp(*a, *b))
            .unwrap_or_else(|| (State::Unknown, self.core.timestamp()))
    }

    /// Lowest state among the subtree's machines, this node's own excluded.
    /// Ties go to the more recent entry.
    pub fn lowest_child_state(&self) -> (State, Timestamp) {
        let mut states = Vec::new();
        self.collect_descendant_states(&mut states);
        states
            .into_iter()
            .min_by(|a, b| a.0.rank().cmp(&b.0.rank()).then(b.1.cmp(&a.1)))
            .unwrap_or_else(|| (State::Unknown, self.core.timestamp()))
    }

    /// Highest state among the subtree's machines, this node's own excluded.
    /// Ties go to the more recent entry.
    pub fn highest_child_state(&self) -> (State, Timestamp) {
        let mut states = Vec::new();
        self.collect_descendant_states(&mut states);
        states
            .into_iter()
            .max_by(|a, b| State::aggregate_cmp(*a, *b))
            .unwrap_or_else(|| (State::Unknown, self.core.timestamp()))
    }

    fn collect_descendant_states(&self, out: &mut Vec<(State, Timestamp)>) {
        for node in self.child_nodes() {
            if let Some(sm) = node.state_machine() {
                out.push(sm.get_state());
            }
            node.collect_descendant_states(out);
        }
    }

    /// Command every child state machine to `state`.
    ///
    /// Child nodes without a machine pass the command on to their own
    /// children. If any machine refuses, the ones already moved are driven
    /// back to their previous state. Returns whether every machine accepted.
    pub fn set_children_state(&self, timestamp: Timestamp, state: State) -> bool {
        component_event!(self.core, debug, "Children to {} (requested at {})", state, timestamp);
        self.propagate_to_children(timestamp, state, Cascade::All)
    }

    /// Pass a committed `from → to` change of this node's machine on to the
    /// auto-enabled machines below it.
    ///
    /// Followers whose policy does not cover `to` are skipped, and a
    /// follower never moves against the direction of its parent's change.
    pub(crate) fn follow_parent(&self, timestamp: Timestamp, from: State, to: State) -> bool {
        let rising = to.rank() > from.rank();
        self.propagate_to_children(timestamp, to, Cascade::Followers { rising })
    }

    fn propagate_to_children(&self, timestamp: Timestamp, state: State, cascade: Cascade) -> bool {
        let mut moved = Vec::new();
        match self.propagate_into(state, cascade, &mut moved) {
            Ok(()) => true,
            Err(err) => {
                component_event!(
                    self.core,
                    warn,
                    "Children refused {} at {}: {}; restoring {} machines",
                    state,
                    timestamp,
                    err,
                    moved.len()
                );
                for (sm, previous) in moved.into_iter().rev() {
                    if let Err(err) = sm.drive_to(previous) {
                        component_event!(self.core, error, "Restoring {} failed: {}", sm.full_name(), err);
                    }
                }
                false
            }
        }
    }

    fn propagate_into(
        &self,
        state: State,
        cascade: Cascade,
        moved: &mut Vec<(Arc<StateMachine>, State)>,
    ) -> Result<(), KernelError> {
        for node in self.child_nodes() {
            let Some(sm) = node.state_machine() else {
                node.propagate_into(state, cascade, moved)?;
                continue;
            };
            if let Cascade::Followers { .. } = cascade
                && !sm.auto_enable().covers(state)
            {
                continue;
            }
            sm.wait_idle();
            let previous = sm.state();
            if previous == state || !cascade.moves(previous, state) {
                continue;
            }
            sm.drive_to(state)?;
            moved.push((sm, previous));
        }
        Ok(())
    }
}

/// Which child machines a state change reaches.
#[derive(Debug, Clone, Copy)]
enum Cascade {
    /// Every machine.
    All,
    /// Auto-enabled machines following their parent's change.
    Followers { rising: bool },
}

impl Cascade {
    fn moves(&self, current: State, target: State) -> bool {
        match self {
            Self::All => true,
            Self::Followers { rising: true } => current.rank() < target.rank(),
            Self::Followers { rising: false } => current.rank() > target.rank(),
        }
    }
}

impl Component for Node {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    /// Applies to the node and its whole subtree.
    fn set_log_level(&self, level: LogLevel) {
        self.core.set_log_level(level);
        for child in self.children() {
            match &child {
                Child::Node(node) => node.set_log_level(level),
                other => other.core().set_log_level(level),
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.core.name())
            .field("port", &self.port)
            .field("children", &self.children.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
