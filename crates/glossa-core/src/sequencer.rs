use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

/// Lifecycle of one user-initiated action on a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Created,
    Validating,
    /// The validation gate halted the attempt; waiting for "commit anyway".
    AwaitingConfirmation,
    Committing,
    Committed,
    Conflict,
    Failed,
    Superseded,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Committed
                | AttemptState::Conflict
                | AttemptState::Failed
                | AttemptState::Superseded
        )
    }

    fn can_advance_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Created, Validating | Committing | Committed | Failed)
                | (Validating, AwaitingConfirmation | Committing)
                | (AwaitingConfirmation, Committing)
                | (Committing, Committed | Conflict | Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTicket {
    unit_id: String,
    attempt_id: u64,
}

impl AttemptTicket {
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn attempt_id(&self) -> u64 {
        self.attempt_id
    }
}

#[derive(Debug)]
struct AttemptSlot {
    latest: u64,
    state: AttemptState,
}

/// Hands out per-unit attempt ids and answers "is this continuation still
/// the latest thing the user asked for?".
///
/// Only the most recent attempt on a unit may touch shared state. Older ones
/// are superseded implicitly by id comparison, so a late response needs no
/// bookkeeping to be discarded.
#[derive(Debug, Default)]
pub struct AttemptSequencer {
    slots: Mutex<HashMap<String, AttemptSlot>>,
}

impl AttemptSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, unit_id: &str) -> AttemptTicket {
        let mut slots = self.slots.lock();
        let slot = slots.entry(unit_id.to_string()).or_insert(AttemptSlot {
            latest: 0,
            state: AttemptState::Created,
        });
        if slot.latest > 0 && !slot.state.is_terminal() {
            debug!(
                unit_id,
                attempt_id = slot.latest,
                state = ?slot.state,
                "review.attempt.superseded"
            );
        }
        slot.latest += 1;
        slot.state = AttemptState::Created;
        AttemptTicket {
            unit_id: unit_id.to_string(),
            attempt_id: slot.latest,
        }
    }

    pub fn is_current(&self, ticket: &AttemptTicket) -> bool {
        self.slots
            .lock()
            .get(&ticket.unit_id)
            .is_some_and(|slot| slot.latest == ticket.attempt_id)
    }

    /// Moves the attempt to `next`. Returns `false`, changing nothing, when the
    /// attempt is no longer current or the transition is not allowed.
    pub fn advance(&self, ticket: &AttemptTicket, next: AttemptState) -> bool {
        self.complete(ticket, next, || ()).is_some()
    }

    /// Moves the attempt to `next` and runs `apply` while holding the
    /// sequencer lock, so no newer attempt can begin between the currency
    /// check and the state change.
    pub fn complete<R>(
        &self,
        ticket: &AttemptTicket,
        next: AttemptState,
        apply: impl FnOnce() -> R,
    ) -> Option<R> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(&ticket.unit_id)?;
        if slot.latest != ticket.attempt_id {
            debug!(
                unit_id = %ticket.unit_id,
                attempt_id = ticket.attempt_id,
                latest = slot.latest,
                "review.attempt.stale_continuation"
            );
            return None;
        }
        if !slot.state.can_advance_to(next) {
            warn!(
                unit_id = %ticket.unit_id,
                attempt_id = ticket.attempt_id,
                from = ?slot.state,
                to = ?next,
                "review.attempt.invalid_transition"
            );
            return None;
        }
        slot.state = next;
        Some(apply())
    }

    pub fn state_of(&self, unit_id: &str, attempt_id: u64) -> Option<AttemptState> {
        let slots = self.slots.lock();
        let slot = slots.get(unit_id)?;
        if attempt_id == slot.latest {
            Some(slot.state)
        } else if attempt_id > 0 && attempt_id < slot.latest {
            Some(AttemptState::Superseded)
        } else {
            None
        }
    }

    pub fn current(&self, unit_id: &str) -> Option<(u64, AttemptState)> {
        self.slots
            .lock()
            .get(unit_id)
            .map(|slot| (slot.latest, slot.state))
    }
}
