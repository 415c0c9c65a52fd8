use serde::{Deserialize, Serialize};

/// Inputs to the loop's transition function.
///
/// The engine produces exactly one event per handled state; the pair
/// `(LoopState, Event)` is then resolved by `transitions::next_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// Planning produced a valid plan.
    PlanReady,
    /// A step attempt produced a `StepResult` (any status).
    StepFinished,
    // Reflection verdicts
    Continue,
    Retry,
    Escalate,
    /// Reflection asked for a retry but the step has no budget left.
    BudgetExhausted,
    /// The back-off delay before a retry has elapsed.
    BackoffElapsed,
    /// Operator or harness cancellation.
    Cancel,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanReady       => "PlanReady",
            Self::StepFinished    => "StepFinished",
            Self::Continue        => "Continue",
            Self::Retry           => "Retry",
            Self::Escalate        => "Escalate",
            Self::BudgetExhausted => "BudgetExhausted",
            Self::BackoffElapsed  => "BackoffElapsed",
            Self::Cancel          => "Cancel",
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
