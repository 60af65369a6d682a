//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga run in its lifecycle.
///
/// State transitions:
/// ```text
/// Idle ──► Running ──┬──► Committed
///                    └──► RollingBack ──► RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Steps have been configured but `execute` has not been called.
    #[default]
    Idle,

    /// Saga steps are being executed.
    Running,

    /// A step exhausted its retries and compensations are in progress.
    RollingBack,

    /// All steps completed and the transaction, if any, committed (terminal state).
    Committed,

    /// Compensation finished after a failure (terminal state).
    RolledBack,
}

impl SagaState {
    /// Returns true if the saga can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaState::Idle)
    }

    /// Returns true if the saga can begin rolling back.
    pub fn can_roll_back(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Committed | SagaState::RolledBack)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Idle => "Idle",
            SagaState::Running => "Running",
            SagaState::RollingBack => "RollingBack",
            SagaState::Committed => "Committed",
            SagaState::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
