//! Error types for the kernel components.
//!
//! Scheduler, budget and signal errors are configuration errors reported
//! at the call site. Pipeline and message errors live next to the code
//! that raises them in `coproc-core`.

use thiserror::Error;

/// Errors raised by the team scheduler.
///
/// These are configuration errors: the caller referenced a team that is
/// already registered, or one that does not exist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("team '{0}' is already registered")]
    DuplicateTeam(String),

    #[error("team '{0}' is not registered")]
    UnknownTeam(String),
}

/// Errors raised by the budget manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("engine '{0}' is already registered")]
    DuplicateEngine(String),

    #[error("engine '{0}' is not registered")]
    UnknownEngine(String),

    #[error("allocation percentage {0} is outside 0..=100")]
    InvalidPercentage(u8),

    #[error("registering '{engine}' would allocate {total}% of the effective budget")]
    OverAllocated { engine: String, total: u32 },
}

/// Errors raised by a team's signal register.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("signal bit {0} is outside 0..=31")]
    BitOutOfRange(u32),

    #[error("wait mask is empty")]
    EmptyMask,

    /// The register was reset while the wait was pending.
    ///
    /// This is the kernel's cancellation signal and is never produced by an
    /// application failure.
    #[error("signal register '{chip}' was reset")]
    Reset { chip: String },
}

impl SignalError {
    /// Whether this error is the cancellation produced by `reset()`.
    pub fn is_reset(&self) -> bool {
        matches!(self, SignalError::Reset { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::DuplicateTeam("research".to_string());
        assert_eq!(err.to_string(), "team 'research' is already registered");
    }

    #[test]
    fn test_budget_error_display() {
        let err = BudgetError::OverAllocated {
            engine: "review".to_string(),
            total: 120,
        };
        assert!(err.to_string().contains("review"));
        assert!(err.to_string().contains("120%"));
    }

    #[test]
    fn test_reset_is_distinguishable() {
        let reset = SignalError::Reset {
            chip: "alpha".to_string(),
        };
        assert!(reset.is_reset());
        assert!(!SignalError::BitOutOfRange(40).is_reset());
        assert!(!SignalError::EmptyMask.is_reset());
    }
}
