use crate::error::EngineError;
use crate::events::Event;
use crate::types::LoopState;

/// The loop's transition function.
///
/// `plan_len` is needed to tell `Executing(i + 1)` from `Completed` after a
/// continue verdict. Any pair not matched here is illegal and comes back as
/// `EngineError::InvalidTransition`.
pub fn next_state(from: LoopState, event: Event, plan_len: usize) -> Result<LoopState, EngineError> {
    use LoopState::*;

    let next = match (from, event) {
        // Cancellation wins from any live state.
        (Escalated | Completed | Aborted, _) => None,
        (_, Event::Cancel) => Some(Aborted),

        (Planning, Event::PlanReady) if plan_len > 0 => Some(Executing { step: 0 }),

        (Executing { step }, Event::StepFinished) => Some(Reflecting { step }),

        (Reflecting { step }, Event::Continue) if step + 1 < plan_len => Some(Executing { step: step + 1 }),
        (Reflecting { step }, Event::Continue) if step + 1 == plan_len => Some(Completed),
        (Reflecting { step }, Event::Retry) => Some(Retrying { step }),
        (Reflecting { .. }, Event::Escalate | Event::BudgetExhausted) => Some(Escalated),

        (Retrying { step }, Event::BackoffElapsed) => Some(Executing { step }),

        (Planning | Executing { .. } | Reflecting { .. } | Retrying { .. }, _) => None,
    };

    next.ok_or(EngineError::InvalidTransition { from, event })
}

/// Validates that a given (state, event) pair is legal for a plan of `plan_len` steps.
pub fn is_valid_transition(from: LoopState, event: Event, plan_len: usize) -> bool {
    next_state(from, event, plan_len).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use LoopState::*;

    #[test]
    fn happy_path_walks_every_step() {
        let len = 3;
        let mut state = next_state(Planning, Event::PlanReady, len).unwrap();
        assert_eq!(state, Executing { step: 0 });
        for i in 0..len {
            state = next_state(state, Event::StepFinished, len).unwrap();
            assert_eq!(state, Reflecting { step: i });
            state = next_state(state, Event::Continue, len).unwrap();
        }
        assert_eq!(state, Completed);
    }

    #[test]
    fn retry_goes_through_backoff_back_to_same_step() {
        let state = next_state(Reflecting { step: 1 }, Event::Retry, 3).unwrap();
        assert_eq!(state, Retrying { step: 1 });
        assert_eq!(next_state(state, Event::BackoffElapsed, 3).unwrap(), Executing { step: 1 });
    }

    #[test]
    fn exhausted_budget_and_escalate_both_escalate() {
        assert_eq!(next_state(Reflecting { step: 0 }, Event::BudgetExhausted, 3).unwrap(), Escalated);
        assert_eq!(next_state(Reflecting { step: 2 }, Event::Escalate, 3).unwrap(), Escalated);
    }

    #[test]
    fn cancel_aborts_live_states_only() {
        for state in [Planning, Executing { step: 0 }, Reflecting { step: 0 }, Retrying { step: 0 }] {
            assert_eq!(next_state(state, Event::Cancel, 2).unwrap(), Aborted);
        }
        for state in [Escalated, Completed, Aborted] {
            assert!(!is_valid_transition(state, Event::Cancel, 2));
        }
    }

    #[test]
    fn illegal_pairs_are_rejected() {
        assert!(!is_valid_transition(Planning, Event::PlanReady, 0));
        assert!(!is_valid_transition(Executing { step: 0 }, Event::Continue, 3));
        assert!(!is_valid_transition(Retrying { step: 0 }, Event::StepFinished, 3));
        let err = next_state(Reflecting { step: 0 }, Event::BackoffElapsed, 1).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }
}
