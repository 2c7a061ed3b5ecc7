use std::fmt;

use glossa_types::{CommitPayload, DecisionState, TextUnit};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionTransition {
    Decide,
    Reopen,
}

impl fmt::Display for DecisionTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionTransition::Decide => f.write_str("decide"),
            DecisionTransition::Reopen => f.write_str("reopen"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    #[error("cannot {transition} a unit whose decision is already {from}")]
    InvalidTransition {
        from: DecisionState,
        transition: DecisionTransition,
    },
}

/// PENDING/DECIDED transitions. Payloads built here go through the same
/// guarded commit as content edits.
pub struct DecisionStateMachine;

impl DecisionStateMachine {
    pub fn apply(
        from: DecisionState,
        transition: DecisionTransition,
    ) -> Result<DecisionState, DecisionError> {
        match (from, transition) {
            (DecisionState::Pending, DecisionTransition::Decide) => Ok(DecisionState::Decided),
            (DecisionState::Decided, DecisionTransition::Reopen) => Ok(DecisionState::Pending),
            (from, transition) => Err(DecisionError::InvalidTransition { from, transition }),
        }
    }

    /// Payload for a pure decision change: no content, no status.
    pub fn transition_payload(
        unit: &TextUnit,
        transition: DecisionTransition,
    ) -> Result<CommitPayload, DecisionError> {
        Ok(CommitPayload {
            content: None,
            status: None,
            decision_state: Self::apply(unit.decision_state, transition)?,
        })
    }

    /// Payload that changes content and finalizes the decision in one commit.
    pub fn decide_with_content(content: impl Into<String>) -> CommitPayload {
        CommitPayload {
            content: Some(content.into()),
            status: None,
            decision_state: DecisionState::Decided,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decide_and_reopen_are_the_only_transitions() {
        assert_eq!(
            DecisionStateMachine::apply(DecisionState::Pending, DecisionTransition::Decide),
            Ok(DecisionState::Decided)
        );
        assert_eq!(
            DecisionStateMachine::apply(DecisionState::Decided, DecisionTransition::Reopen),
            Ok(DecisionState::Pending)
        );
        let err = DecisionStateMachine::apply(DecisionState::Decided, DecisionTransition::Decide)
            .expect_err("already decided");
        assert_eq!(
            err.to_string(),
            "cannot decide a unit whose decision is already decided"
        );
        assert!(
            DecisionStateMachine::apply(DecisionState::Pending, DecisionTransition::Reopen)
                .is_err()
        );
    }

    #[test]
    fn pure_transition_carries_no_content() {
        let unit = TextUnit::new("u", "Save");
        let payload = DecisionStateMachine::transition_payload(&unit, DecisionTransition::Decide)
            .expect("payload");
        assert!(!payload.changes_content());
        assert_eq!(payload.status, None);
        assert_eq!(payload.decision_state, DecisionState::Decided);
    }

    #[test]
    fn combined_payload_is_one_commit() {
        let payload = DecisionStateMachine::decide_with_content("Enregistrer");
        assert_eq!(payload.content.as_deref(), Some("Enregistrer"));
        assert_eq!(payload.decision_state, DecisionState::Decided);
    }
}
