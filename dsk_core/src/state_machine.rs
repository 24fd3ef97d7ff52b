//! Lifecycle state machine attached to a node.
//!
//! Stable states `Off`, `On`, `Running`, `Fault`. A commanded transition
//! records a transitional state, runs the matching device delegate (inline
//! or on a worker thread) and commits either the target or `Fault`.
//!
//! ```text
//! off ──switchOn──▶ on ──start──▶ running
//!  ▲                │ ▲            │
//!  └───switchOff────┘ └────stop────┘
//! fault ──recover──▶ off      any stable ──▶ fault
//! ```

use dsk_common::error::{DelegateError, KernelResult, Recovery, StateMachineError};
use dsk_common::state::{AutoEnable, State};
use dsk_common::value::Timestamp;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::component::{Component, ComponentCore, component_event};
use crate::control_system::{CommandDefinition, ComponentRef, ControlSystem};

/// `switchOn`, `switchOff`, `start` and `stop` delegates.
pub type TransitionDelegate = Arc<dyn Fn() -> Result<(), DelegateError> + Send + Sync>;

/// `recover` delegate. `StayFaulted` keeps the machine in `Fault`.
pub type RecoverDelegate = Arc<dyn Fn() -> Result<Recovery, DelegateError> + Send + Sync>;

/// `allowChange(current, global, target)`.
pub type AllowChangeDelegate = Arc<dyn Fn(State, State, State) -> bool + Send + Sync>;

/// Device delegates driving a state machine. Unset delegates succeed.
#[derive(Clone)]
pub struct StateHandlers {
    switch_on: TransitionDelegate,
    switch_off: TransitionDelegate,
    start: TransitionDelegate,
    stop: TransitionDelegate,
    recover: RecoverDelegate,
    allow_change: AllowChangeDelegate,
}

impl Default for StateHandlers {
    fn default() -> Self {
        Self {
            switch_on: Arc::new(|| Ok(())),
            switch_off: Arc::new(|| Ok(())),
            start: Arc::new(|| Ok(())),
            stop: Arc::new(|| Ok(())),
            recover: Arc::new(|| Ok(Recovery::Recovered)),
            allow_change: Arc::new(|_, _, _| true),
        }
    }
}

impl StateHandlers {
    pub fn on_switch_on(
        mut self,
        f: impl Fn() -> Result<(), DelegateError> + Send + Sync + 'static,
    ) -> Self {
        self.switch_on = Arc::new(f);
        self
    }

    pub fn on_switch_off(
        mut self,
        f: impl Fn() -> Result<(), DelegateError> + Send + Sync + 'static,
    ) -> Self {
        self.switch_off = Arc::new(f);
        self
    }

    pub fn on_start(mut self, f: impl Fn() -> Result<(), DelegateError> + Send + Sync + 'static) -> Self {
        self.start = Arc::new(f);
        self
    }

    pub fn on_stop(mut self, f: impl Fn() -> Result<(), DelegateError> + Send + Sync + 'static) -> Self {
        self.stop = Arc::new(f);
        self
    }

    pub fn on_recover(
        mut self,
        f: impl Fn() -> Result<Recovery, DelegateError> + Send + Sync + 'static,
    ) -> Self {
        self.recover = Arc::new(f);
        self
    }

    pub fn allow_change(mut self, f: impl Fn(State, State, State) -> bool + Send + Sync + 'static) -> Self {
        self.allow_change = Arc::new(f);
        self
    }

    pub(crate) fn start_delegate(&self) -> TransitionDelegate {
        Arc::clone(&self.start)
    }
}

/// Lifecycle automaton. At most one per node.
pub struct StateMachine {
    core: ComponentCore,
    current: Mutex<(State, Timestamp)>,
    handlers: StateHandlers,
    asynchronous: bool,
    auto_enable: AutoEnable,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StateMachine {
    /// Local name every state machine carries.
    pub const NAME: &'static str = "StateMachine";

    /// Create a machine in `Off`. `asynchronous` machines run delegates on a
    /// worker thread and return from `set_state` immediately.
    pub fn new(asynchronous: bool, handlers: StateHandlers) -> Self {
        Self {
            core: ComponentCore::new(Self::NAME),
            current: Mutex::new((State::Off, Timestamp::ZERO)),
            handlers,
            asynchronous,
            auto_enable: AutoEnable::None,
            worker: Mutex::new(None),
        }
    }

    pub fn with_auto_enable(mut self, policy: AutoEnable) -> Self {
        self.auto_enable = policy;
        self
    }

    pub fn state(&self) -> State {
        self.current.lock().0
    }

    /// Current state and the time it was entered.
    pub fn get_state(&self) -> (State, Timestamp) {
        *self.current.lock()
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    pub fn auto_enable(&self) -> AutoEnable {
        self.auto_enable
    }

    // ─── Transitions ────────────────────────────────────────────────

    /// Transitional state for `current → target`, or `None` for a commanded
    /// fault, which runs no delegate.
    fn plan(current: State, target: State) -> Result<Option<State>, StateMachineError> {
        use State::*;

        match (current, target) {
            // off → on, on → off, on → running, running → on, fault → off
            (Off, On) | (On, Off) | (On, Running) | (Running, On) | (Fault, Off) => {
                Ok(current.transitional_towards(target))
            }
            // any stable → fault
            (Off | On | Running, Fault) => Ok(None),
            _ => Err(StateMachineError::NoSuchTransition {
                from: current,
                to: target,
            }),
        }
    }

    /// Global state of the owning node, used as `allowChange` context.
    fn owner_global_state(&self) -> State {
        match self.core.parent() {
            Some(node) => node.global_state().0,
            None => self.state(),
        }
    }

    /// Whether `set_state(target)` would currently be accepted. No side effects.
    pub fn can_change(&self, target: State) -> bool {
        let current = self.state();
        if target.is_transitional() || current.is_transitional() {
            return false;
        }
        Self::plan(current, target).is_ok()
            && (self.handlers.allow_change)(current, self.owner_global_state(), target)
    }

    /// Command a transition to `target`.
    ///
    /// # Errors
    ///
    /// - `IntermediateState` when `target` is transitional
    /// - `Busy` while another transition is in flight
    /// - `NoSuchTransition` when `target` is unreachable from the current state
    /// - `TransitionDenied` when `allowChange` refuses; state and timestamp
    ///   are left untouched
    /// - `Lifecycle` (synchronous machines only) when the delegate failed and
    ///   the machine moved to `Fault`
    pub fn set_state(self: &Arc<Self>, target: State) -> KernelResult<()> {
        if target.is_transitional() {
            return Err(StateMachineError::IntermediateState(target).into());
        }
        let current = self.state();
        if current.is_transitional() {
            return Err(StateMachineError::Busy(current).into());
        }
        let transitional = Self::plan(current, target)?;

        let global = self.owner_global_state();
        if !(self.handlers.allow_change)(current, global, target) {
            component_event!(self.core, info, "Transition {} -> {} denied", current, target);
            return Err(StateMachineError::TransitionDenied {
                from: current,
                to: target,
            }
            .into());
        }

        let timestamp = self.core.timestamp();
        {
            let mut slot = self.current.lock();
            if slot.0 != current {
                return Err(StateMachineError::Busy(slot.0).into());
            }
            *slot = (transitional.unwrap_or(State::Fault), timestamp);
        }

        let Some(transitional) = transitional else {
            component_event!(self.core, warn, "Fault commanded from {}", current);
            self.commit(current, State::Fault, timestamp);
            return Ok(());
        };
        self.notify(transitional, timestamp);
        component_event!(self.core, debug, "{} -> {} via {}", current, target, transitional);

        if !self.asynchronous {
            return self.run_transition(current, transitional, target);
        }

        // The previous worker may still be cascading its commit to the
        // children; the new worker joins it before running its delegate.
        let mut worker = self.worker.lock();
        let previous = worker.take();
        let machine = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("sm-{}", self.core.name()))
            .spawn(move || {
                if let Some(previous) = previous {
                    let _ = previous.join();
                }
                // Errors are already logged and reflected as Fault.
                let _ = machine.run_transition(current, transitional, target);
            });
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                drop(worker);
                self.commit(current, State::Fault, self.core.timestamp());
                Err(StateMachineError::Lifecycle {
                    target,
                    reason: err.to_string(),
                }
                .into())
            }
        }
    }

    fn run_transition(self: &Arc<Self>, from: State, transitional: State, target: State) -> KernelResult<()> {
        let outcome = match transitional {
            State::SwitchingOn => (self.handlers.switch_on)().map(|()| State::On),
            State::SwitchingOff => (self.handlers.switch_off)().map(|()| State::Off),
            State::Starting => (self.handlers.start)().map(|()| State::Running),
            State::Stopping => (self.handlers.stop)().map(|()| State::On),
            State::Recovering => (self.handlers.recover)().map(|r| match r {
                Recovery::Recovered => State::Off,
                Recovery::StayFaulted => State::Fault,
            }),
            _ => Ok(target),
        };

        let timestamp = self.core.timestamp();
        match outcome {
            Ok(state) => {
                if state != target {
                    component_event!(self.core, warn, "Recovery declined, staying in {}", state);
                }
                self.commit(from, state, timestamp);
                Ok(())
            }
            Err(err) => {
                component_event!(self.core, error, "Transition {} -> {} failed: {}", from, target, err);
                self.commit(from, State::Fault, timestamp);
                Err(StateMachineError::Lifecycle {
                    target,
                    reason: err.0,
                }
                .into())
            }
        }
    }

    fn commit(self: &Arc<Self>, from: State, state: State, timestamp: Timestamp) {
        *self.current.lock() = (state, timestamp);
        self.notify(state, timestamp);
        component_event!(self.core, info, "State {}", state);

        if let Some(node) = self.core.parent()
            && !node.follow_parent(timestamp, from, state)
        {
            component_event!(self.core, warn, "Not every child followed state {}", state);
        }
    }

    fn notify(&self, state: State, timestamp: Timestamp) {
        if let Some(cs) = self.core.control_system() {
            cs.state_changed(self, state, timestamp);
        }
    }

    /// Block until an in-flight asynchronous transition has finished.
    pub fn wait_idle(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                *self.worker.lock() = Some(handle);
                return;
            }
            let _ = handle.join();
        }
    }

    /// Walk through intermediate stable states until `target` is reached.
    ///
    /// `Off → Running` passes through `On`; `Fault → On` recovers first.
    pub fn drive_to(self: &Arc<Self>, target: State) -> KernelResult<()> {
        use State::*;

        for _ in 0..4 {
            self.wait_idle();
            let current = self.state();
            if current == target {
                return Ok(());
            }
            let next = match (current, target) {
                (Off, On | Running) => On,
                (Running, On | Off) => On,
                (Fault, Off | On | Running) => Off,
                _ => target,
            };
            self.set_state(next)?;
            self.wait_idle();
            if self.state() == Fault && target != Fault {
                return Err(StateMachineError::Lifecycle {
                    target,
                    reason: format!("{} ended in fault", self.core.full_name()),
                }
                .into());
            }
        }
        match self.state() {
            state if state == target => Ok(()),
            state => Err(StateMachineError::NoSuchTransition {
                from: state,
                to: target,
            }
            .into()),
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    pub(crate) fn register(self: &Arc<Self>, cs: &Arc<dyn ControlSystem>) -> KernelResult<()> {
        cs.initialize(ComponentRef::StateMachine(self))?;
        self.core.bind(Arc::clone(cs));
        let mut slot = self.current.lock();
        slot.1 = self.core.timestamp();
        Ok(())
    }

    /// `switchOn`, `switchOff`, `start` and `stop` on the owning node.
    pub(crate) fn define_commands(self: &Arc<Self>, cs: &Arc<dyn ControlSystem>) -> KernelResult<()> {
        if let Some(node) = self.core.parent() {
            let owner = node.full_name();
            for (command, target) in [
                ("switchOn", State::On),
                ("switchOff", State::Off),
                ("start", State::Running),
                ("stop", State::On),
            ] {
                let weak = Arc::downgrade(self);
                cs.define_command(
                    &owner,
                    CommandDefinition::new(command, command, 0, move |_| {
                        let machine = weak
                            .upgrade()
                            .ok_or(dsk_common::error::TreeError::Detached)?;
                        machine.set_state(target)?;
                        Ok(vec![machine.state().to_string()])
                    }),
                )?;
            }
        }
        Ok(())
    }

    pub(crate) fn deinitialize(self: &Arc<Self>) {
        self.wait_idle();
        if let Some(cs) = self.core.control_system() {
            cs.deinitialize(ComponentRef::StateMachine(self));
        }
        self.core.unbind();
    }
}

impl Component for StateMachine {
    fn core(&self) -> &ComponentCore {
        &self.core
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.get_state())
            .field("asynchronous", &self.asynchronous)
            .field("auto_enable", &self.auto_enable)
            .finish_non_exhaustive()
    }
}
