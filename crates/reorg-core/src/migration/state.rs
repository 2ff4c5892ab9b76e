//! Driver lifecycle state.

use std::fmt;

/// Lifecycle of one reorganization of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Nothing running.
    Idle,
    /// Inspecting and validating.
    Planning,
    /// Running the given 1-based step.
    Executing(u32),
    /// Every step ran. `warning` is set when the reload stopped early.
    Succeeded {
        /// Completed with a warning.
        warning: bool,
    },
    /// Validation or a step failed.
    Failed,
}

impl DriverState {
    /// Whether the state ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DriverState::Succeeded { .. } | DriverState::Failed)
    }

    /// Whether `next` may follow this state.
    pub fn can_transition_to(&self, next: DriverState) -> bool {
        use DriverState::*;
        match (*self, next) {
            (Idle, Planning) | (Idle, Executing(1)) => true,
            (Planning, Idle) | (Planning, Failed) | (Planning, Executing(1)) => true,
            (Executing(n), Executing(m)) => m == n + 1,
            (Executing(_), Succeeded { .. }) | (Executing(_), Failed) => true,
            (Succeeded { .. } | Failed, Idle | Planning | Executing(1)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Idle => write!(f, "idle"),
            DriverState::Planning => write!(f, "planning"),
            DriverState::Executing(step) => write!(f, "executing step {step}"),
            DriverState::Succeeded { warning: false } => write!(f, "succeeded"),
            DriverState::Succeeded { warning: true } => write!(f, "succeeded with warnings"),
            DriverState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(DriverState::Idle.can_transition_to(DriverState::Planning));
        assert!(DriverState::Planning.can_transition_to(DriverState::Failed));
        assert!(DriverState::Planning.can_transition_to(DriverState::Executing(1)));
        assert!(DriverState::Executing(1).can_transition_to(DriverState::Executing(2)));
        assert!(!DriverState::Executing(1).can_transition_to(DriverState::Executing(3)));
        assert!(DriverState::Executing(7).can_transition_to(DriverState::Succeeded { warning: true }));
        assert!(!DriverState::Idle.can_transition_to(DriverState::Succeeded { warning: false }));
        assert!(DriverState::Failed.can_transition_to(DriverState::Planning));
    }

    #[test]
    fn test_terminal() {
        assert!(DriverState::Failed.is_terminal());
        assert!(DriverState::Succeeded { warning: false }.is_terminal());
        assert!(!DriverState::Executing(2).is_terminal());
        assert_eq!(DriverState::Executing(2).to_string(), "executing step 2");
    }
}
