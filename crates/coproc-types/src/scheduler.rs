//! Scheduler snapshot types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamState {
    /// Eligible for the next `schedule()`.
    Ready,
    /// The host has claimed a turn for this team.
    Running,
    /// Excluded from `schedule()` output but keeps its rotation slot.
    Sleeping,
    /// Deregistered. Only ever seen on the entry returned by `remove`.
    Removed,
}

impl fmt::Display for TeamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Sleeping => write!(f, "sleeping"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// A team registered with the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerEntry {
    pub name: String,
    /// Higher runs sooner.
    pub priority: i32,
    pub state: TeamState,
}
