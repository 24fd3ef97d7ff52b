//! Lifecycle states and the auto-enable policy.
//!
//! Every node may own one state machine. Its state is one of the stable
//! states (`Off`, `On`, `Running`, `Fault`) or a transitional state that is
//! held while a delegate runs. Nodes without a machine report `Unknown`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::value::Timestamp;

// ─── State ──────────────────────────────────────────────────────────

/// Lifecycle state of a state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum State {
    /// No state machine attached.
    #[default]
    Unknown = 0,
    /// Device switched off.
    Off = 1,
    /// `switchOn` delegate executing.
    SwitchingOn = 2,
    /// `switchOff` delegate executing.
    SwitchingOff = 3,
    /// Device ready but not acquiring.
    On = 4,
    /// `start` delegate executing.
    Starting = 5,
    /// `stop` delegate executing.
    Stopping = 6,
    /// Device acquiring.
    Running = 7,
    /// `recover` delegate executing.
    Recovering = 8,
    /// A delegate failed or fault was commanded.
    Fault = 9,
}

impl State {
    /// All states, in code order.
    pub const ALL: [State; 10] = [
        State::Unknown,
        State::Off,
        State::SwitchingOn,
        State::SwitchingOff,
        State::On,
        State::Starting,
        State::Stopping,
        State::Running,
        State::Recovering,
        State::Fault,
    ];

    /// True while a transition delegate is executing.
    pub const fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::SwitchingOn
                | Self::SwitchingOff
                | Self::Starting
                | Self::Stopping
                | Self::Recovering
        )
    }

    /// True for `Off`, `On`, `Running` and `Fault`.
    pub const fn is_stable(&self) -> bool {
        matches!(self, Self::Off | Self::On | Self::Running | Self::Fault)
    }

    /// Position in the aggregation order used for global / highest state.
    ///
    /// `Unknown < Off < Recovering < SwitchingOff < SwitchingOn < On <
    /// Stopping < Starting < Running < Fault`.
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Off => 1,
            Self::Recovering => 2,
            Self::SwitchingOff => 3,
            Self::SwitchingOn => 4,
            Self::On => 5,
            Self::Stopping => 6,
            Self::Starting => 7,
            Self::Running => 8,
            Self::Fault => 9,
        }
    }

    /// Compare two `(state, entered_at)` pairs in aggregation order.
    ///
    /// Equal ranks fall back to the entry timestamp, later being greater.
    pub fn aggregate_cmp(a: (State, Timestamp), b: (State, Timestamp)) -> Ordering {
        a.0.rank().cmp(&b.0.rank()).then(a.1.cmp(&b.1))
    }

    /// Transitional state held while moving from `self` to `target`.
    ///
    /// `None` when the pair is not a delegate-backed transition.
    pub const fn transitional_towards(&self, target: State) -> Option<State> {
        match (self, target) {
            (Self::Off, Self::On) => Some(Self::SwitchingOn),
            (Self::On, Self::Off) => Some(Self::SwitchingOff),
            (Self::On, Self::Running) => Some(Self::Starting),
            (Self::Running, Self::On) => Some(Self::Stopping),
            (Self::Fault, Self::Off) => Some(Self::Recovering),
            _ => None,
        }
    }

    /// Lower-case identifier, as used in logs and status dumps.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Off => "off",
            Self::SwitchingOn => "switching_on",
            Self::SwitchingOff => "switching_off",
            Self::On => "on",
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Running => "running",
            Self::Recovering => "recovering",
            Self::Fault => "fault",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<State> for i32 {
    fn from(state: State) -> Self {
        state as i32
    }
}

impl TryFrom<i32> for State {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        State::ALL
            .iter()
            .copied()
            .find(|s| *s as i32 == code)
            .ok_or(code)
    }
}

// ─── Auto-enable ────────────────────────────────────────────────────

/// How far a state machine follows a state commanded on its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoEnable {
    /// Never follows the parent.
    #[default]
    None,
    /// Follows the parent up to `On`.
    DriveToOn,
    /// Follows the parent up to `Running`.
    DriveToRunning,
}

impl AutoEnable {
    /// Whether this policy lets the machine follow a parent-commanded `target`.
    pub const fn covers(&self, target: State) -> bool {
        match (self, target) {
            (Self::None, _) => false,
            (_, State::Off) => true,
            (Self::DriveToOn | Self::DriveToRunning, State::On) => true,
            (Self::DriveToRunning, State::Running) => true,
            _ => false,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
