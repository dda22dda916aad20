use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted per-atom state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtomState {
    Pending,
    Running,
    Success,
    Failure,
    Reverting,
    Reverted,
    RevertFailure,
}

impl AtomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtomState::Pending => "PENDING",
            AtomState::Running => "RUNNING",
            AtomState::Success => "SUCCESS",
            AtomState::Failure => "FAILURE",
            AtomState::Reverting => "REVERTING",
            AtomState::Reverted => "REVERTED",
            AtomState::RevertFailure => "REVERT_FAILURE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(AtomState::Pending),
            "RUNNING" => Some(AtomState::Running),
            "SUCCESS" => Some(AtomState::Success),
            "FAILURE" => Some(AtomState::Failure),
            "REVERTING" => Some(AtomState::Reverting),
            "REVERTED" => Some(AtomState::Reverted),
            "REVERT_FAILURE" => Some(AtomState::RevertFailure),
            _ => None,
        }
    }

    /// States in which atom code is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, AtomState::Running | AtomState::Reverting)
    }
}

impl fmt::Display for AtomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted per-atom directive steering it toward execution or reversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intention {
    Execute,
    Revert,
    Retry,
    Ignore,
}

impl Intention {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intention::Execute => "EXECUTE",
            Intention::Revert => "REVERT",
            Intention::Retry => "RETRY",
            Intention::Ignore => "IGNORE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "EXECUTE" => Some(Intention::Execute),
            "REVERT" => Some(Intention::Revert),
            "RETRY" => Some(Intention::Retry),
            "IGNORE" => Some(Intention::Ignore),
            _ => None,
        }
    }
}

impl fmt::Display for Intention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted state of a whole flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Pending,
    Running,
    Success,
    Failure,
    Reverted,
    Suspending,
    Suspended,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Pending => "PENDING",
            FlowState::Running => "RUNNING",
            FlowState::Success => "SUCCESS",
            FlowState::Failure => "FAILURE",
            FlowState::Reverted => "REVERTED",
            FlowState::Suspending => "SUSPENDING",
            FlowState::Suspended => "SUSPENDED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(FlowState::Pending),
            "RUNNING" => Some(FlowState::Running),
            "SUCCESS" => Some(FlowState::Success),
            "FAILURE" => Some(FlowState::Failure),
            "REVERTED" => Some(FlowState::Reverted),
            "SUSPENDING" => Some(FlowState::Suspending),
            "SUSPENDED" => Some(FlowState::Suspended),
            _ => None,
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the scheduler asks an executor to do with an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Execute,
    Revert,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Execute => write!(f, "execute"),
            Action::Revert => write!(f, "revert"),
        }
    }
}
