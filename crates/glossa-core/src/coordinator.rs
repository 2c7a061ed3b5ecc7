//! Single entry point for every user-initiated change to a unit.
//!
//! Each call begins a new attempt on the unit, optionally runs the validation
//! gate, commits through the concurrency guard and applies the result to the
//! cached copy only if the attempt is still the latest one. Conflicts and
//! failed validations come back as values the caller must hand back
//! ([`PendingConflict`], [`PendingConfirmation`]); nothing resolves itself.

use std::collections::HashMap;
use std::sync::Arc;

use glossa_types::{
    CommitPayload, ConflictSnapshot, DecisionState, TextUnit, UnitStatus, VersionToken,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::classifier::TransientErrorClassifier;
use crate::decision::{DecisionStateMachine, DecisionTransition};
use crate::error::{ApiError, CommitFailure};
use crate::guard::{CommitResult, CommitRetry, ConcurrencyGuard, ReviewBackend};
use crate::sequencer::{AttemptSequencer, AttemptState, AttemptTicket};
use crate::validation::{GateVerdict, ValidationGate};

/// A commit halted by the validation gate. Pass it to
/// [`MutationCoordinator::confirm`] to commit anyway.
#[derive(Debug)]
pub struct PendingConfirmation {
    ticket: AttemptTicket,
    payload: CommitPayload,
    expected: VersionToken,
    verdict: GateVerdict,
}

impl PendingConfirmation {
    pub fn unit_id(&self) -> &str {
        self.ticket.unit_id()
    }

    pub fn attempt_id(&self) -> u64 {
        self.ticket.attempt_id()
    }

    pub fn payload(&self) -> &CommitPayload {
        &self.payload
    }

    pub fn verdict(&self) -> &GateVerdict {
        &self.verdict
    }

    pub fn prompt(&self) -> String {
        self.verdict
            .prompt()
            .unwrap_or_else(|| "Commit anyway?".to_string())
    }
}

/// A commit the server rejected because the unit moved on. Carries the live
/// state and the edit that was not applied.
#[derive(Debug)]
pub struct PendingConflict {
    ticket: AttemptTicket,
    payload: CommitPayload,
    snapshot: ConflictSnapshot,
}

impl PendingConflict {
    pub fn unit_id(&self) -> &str {
        self.ticket.unit_id()
    }

    pub fn attempt_id(&self) -> u64 {
        self.ticket.attempt_id()
    }

    pub fn payload(&self) -> &CommitPayload {
        &self.payload
    }

    pub fn snapshot(&self) -> &ConflictSnapshot {
        &self.snapshot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Resubmit the pending edit over the external change.
    UseMine,
    /// Keep the external change. With `finalize_decision`, a unit that has no
    /// decision yet is decided on the external content.
    UseExternal { finalize_decision: bool },
}

#[derive(Debug)]
pub enum MutationOutcome {
    Committed(TextUnit),
    /// The server copy was taken as-is, without a commit.
    Adopted(TextUnit),
    NeedsConfirmation(PendingConfirmation),
    Conflict(PendingConflict),
    Failed(CommitFailure),
    /// A newer action on the same unit took over; nothing was applied.
    Superseded,
}

impl MutationOutcome {
    pub fn unit(&self) -> Option<&TextUnit> {
        match self {
            MutationOutcome::Committed(unit) | MutationOutcome::Adopted(unit) => Some(unit),
            _ => None,
        }
    }
}

pub struct MutationCoordinator {
    guard: ConcurrencyGuard,
    gate: ValidationGate,
    sequencer: AttemptSequencer,
    cache: Mutex<HashMap<String, TextUnit>>,
}

impl MutationCoordinator {
    pub fn new(backend: Arc<dyn ReviewBackend>, gate: ValidationGate) -> Self {
        Self {
            guard: ConcurrencyGuard::new(backend),
            gate,
            sequencer: AttemptSequencer::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_commit_retry(mut self, retry: Option<CommitRetry>) -> Self {
        self.guard = self.guard.with_retry(retry);
        self
    }

    pub fn cached(&self, unit_id: &str) -> Option<TextUnit> {
        self.cache.lock().get(unit_id).cloned()
    }

    pub fn attempt_state(&self, unit_id: &str) -> Option<AttemptState> {
        self.sequencer.current(unit_id).map(|(_, state)| state)
    }

    /// Fetches the unit and replaces the cached copy, unless a newer action on
    /// the unit began meanwhile.
    pub async fn load(&self, unit_id: &str) -> MutationOutcome {
        let ticket = self.sequencer.begin(unit_id);
        match self.guard.backend().fetch_unit(unit_id).await {
            Ok(unit) => self.adopt(&ticket, unit),
            Err(error) => self.fail(&ticket, fetch_failure(error)),
        }
    }

    pub async fn save_content(&self, unit_id: &str, content: &str) -> MutationOutcome {
        let ticket = self.sequencer.begin(unit_id);
        let base = match self.base_unit(&ticket).await {
            Ok(unit) => unit,
            Err(failure) => return self.fail(&ticket, failure),
        };
        let payload = CommitPayload {
            content: Some(content.to_string()),
            status: None,
            decision_state: base.decision_state,
        };
        self.validate_then_commit(ticket, payload, base.version_token)
            .await
    }

    pub async fn change_status(&self, unit_id: &str, status: UnitStatus) -> MutationOutcome {
        let ticket = self.sequencer.begin(unit_id);
        let base = match self.base_unit(&ticket).await {
            Ok(unit) => unit,
            Err(failure) => return self.fail(&ticket, failure),
        };
        let payload = CommitPayload {
            content: None,
            status: Some(status),
            decision_state: base.decision_state,
        };
        self.commit_attempt(ticket, payload, base.version_token, false)
            .await
    }

    pub async fn change_decision(
        &self,
        unit_id: &str,
        transition: DecisionTransition,
    ) -> MutationOutcome {
        let ticket = self.sequencer.begin(unit_id);
        let base = match self.base_unit(&ticket).await {
            Ok(unit) => unit,
            Err(failure) => return self.fail(&ticket, failure),
        };
        let payload = match DecisionStateMachine::transition_payload(&base, transition) {
            Ok(payload) => payload,
            Err(error) => return self.fail(&ticket, error.into()),
        };
        self.commit_attempt(ticket, payload, base.version_token, false)
            .await
    }

    /// Saves `content` and decides the unit in one commit.
    pub async fn save_and_decide(&self, unit_id: &str, content: &str) -> MutationOutcome {
        let ticket = self.sequencer.begin(unit_id);
        let base = match self.base_unit(&ticket).await {
            Ok(unit) => unit,
            Err(failure) => return self.fail(&ticket, failure),
        };
        if let Err(error) =
            DecisionStateMachine::apply(base.decision_state, DecisionTransition::Decide)
        {
            return self.fail(&ticket, error.into());
        }
        let payload = DecisionStateMachine::decide_with_content(content);
        self.validate_then_commit(ticket, payload, base.version_token)
            .await
    }

    /// Commits a payload the validation gate halted. Sends exactly one commit
    /// and does not validate again.
    pub async fn confirm(&self, pending: PendingConfirmation) -> MutationOutcome {
        let PendingConfirmation {
            ticket,
            payload,
            expected,
            ..
        } = pending;
        if !self.sequencer.is_current(&ticket) {
            return superseded(&ticket);
        }
        info!(
            unit_id = ticket.unit_id(),
            attempt_id = ticket.attempt_id(),
            "review.mutation.confirmed"
        );
        self.commit_attempt(ticket, payload, expected, false).await
    }

    pub async fn resolve_conflict(
        &self,
        pending: PendingConflict,
        choice: ConflictChoice,
    ) -> MutationOutcome {
        let PendingConflict {
            ticket: stale,
            payload,
            snapshot,
        } = pending;
        if !self.sequencer.is_current(&stale) {
            return superseded(&stale);
        }
        let ticket = self.sequencer.begin(stale.unit_id());
        info!(
            unit_id = ticket.unit_id(),
            attempt_id = ticket.attempt_id(),
            choice = ?choice,
            "review.conflict.resolving"
        );
        match choice {
            ConflictChoice::UseMine => {
                self.commit_attempt(ticket, payload, snapshot.version_token, true)
                    .await
            }
            ConflictChoice::UseExternal { finalize_decision }
                if finalize_decision && snapshot.decision_state == DecisionState::Pending =>
            {
                let payload = DecisionStateMachine::decide_with_content(snapshot.content);
                self.commit_attempt(ticket, payload, snapshot.version_token, false)
                    .await
            }
            ConflictChoice::UseExternal { .. } => self.adopt(&ticket, snapshot.into()),
        }
    }

    async fn base_unit(&self, ticket: &AttemptTicket) -> Result<TextUnit, CommitFailure> {
        if let Some(unit) = self.cached(ticket.unit_id()) {
            return Ok(unit);
        }
        self.guard
            .backend()
            .fetch_unit(ticket.unit_id())
            .await
            .map_err(fetch_failure)
    }

    async fn validate_then_commit(
        &self,
        ticket: AttemptTicket,
        payload: CommitPayload,
        expected: VersionToken,
    ) -> MutationOutcome {
        if !self.gate.is_enabled() || !payload.changes_content() {
            return self.commit_attempt(ticket, payload, expected, false).await;
        }
        if !self.sequencer.advance(&ticket, AttemptState::Validating) {
            return superseded(&ticket);
        }
        let content = payload.content.as_deref().unwrap_or_default();
        let verdict = self.gate.check(ticket.unit_id(), content).await;
        if verdict.allows_commit() {
            return self.commit_attempt(ticket, payload, expected, false).await;
        }
        if !self
            .sequencer
            .advance(&ticket, AttemptState::AwaitingConfirmation)
        {
            return superseded(&ticket);
        }
        info!(
            unit_id = ticket.unit_id(),
            attempt_id = ticket.attempt_id(),
            verdict = ?verdict,
            "review.mutation.needs_confirmation"
        );
        MutationOutcome::NeedsConfirmation(PendingConfirmation {
            ticket,
            payload,
            expected,
            verdict,
        })
    }

    async fn commit_attempt(
        &self,
        ticket: AttemptTicket,
        payload: CommitPayload,
        expected: VersionToken,
        override_conflict: bool,
    ) -> MutationOutcome {
        if !self.sequencer.advance(&ticket, AttemptState::Committing) {
            return superseded(&ticket);
        }
        let result = self
            .guard
            .commit_if(
                ticket.unit_id(),
                &payload,
                &expected,
                override_conflict,
                || self.sequencer.is_current(&ticket),
            )
            .await;
        let Some(result) = result else {
            return superseded(&ticket);
        };

        match result {
            CommitResult::Applied(unit) => {
                let cached = unit.clone();
                match self
                    .sequencer
                    .complete(&ticket, AttemptState::Committed, || self.replace_cached(cached))
                {
                    Some(()) => MutationOutcome::Committed(unit),
                    None => superseded(&ticket),
                }
            }
            CommitResult::Conflict(snapshot) => {
                let live = TextUnit::from(snapshot.clone());
                match self
                    .sequencer
                    .complete(&ticket, AttemptState::Conflict, || self.replace_cached(live))
                {
                    Some(()) => MutationOutcome::Conflict(PendingConflict {
                        ticket,
                        payload,
                        snapshot,
                    }),
                    None => superseded(&ticket),
                }
            }
            CommitResult::Failed(failure) => self.fail(&ticket, failure),
        }
    }

    fn adopt(&self, ticket: &AttemptTicket, unit: TextUnit) -> MutationOutcome {
        let cached = unit.clone();
        match self
            .sequencer
            .complete(ticket, AttemptState::Committed, || self.replace_cached(cached))
        {
            Some(()) => MutationOutcome::Adopted(unit),
            None => superseded(ticket),
        }
    }

    fn fail(&self, ticket: &AttemptTicket, failure: CommitFailure) -> MutationOutcome {
        if self.sequencer.advance(ticket, AttemptState::Failed) {
            info!(
                unit_id = ticket.unit_id(),
                attempt_id = ticket.attempt_id(),
                code = failure.code(),
                error = %failure,
                "review.mutation.failed"
            );
            MutationOutcome::Failed(failure)
        } else {
            superseded(ticket)
        }
    }

    fn replace_cached(&self, unit: TextUnit) {
        self.cache.lock().insert(unit.id.clone(), unit);
    }
}

fn fetch_failure(error: ApiError) -> CommitFailure {
    if TransientErrorClassifier::shared().is_transient(&error) {
        CommitFailure::Transient(error)
    } else {
        CommitFailure::Terminal(error)
    }
}

fn superseded(ticket: &AttemptTicket) -> MutationOutcome {
    debug!(
        unit_id = ticket.unit_id(),
        attempt_id = ticket.attempt_id(),
        "review.mutation.superseded"
    );
    MutationOutcome::Superseded
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use glossa_types::ValidationResult;

    use super::*;
    use crate::guard::CommitOutcome;
    use crate::store::UnitStore;
    use crate::validation::ContentValidator;

    /// Unit store with per-commit latency, failure injection and call counts.
    #[derive(Default)]
    struct Instrumented {
        store: UnitStore,
        commit_delays: Mutex<VecDeque<Duration>>,
        fail_next_commit: Mutex<Option<ApiError>>,
        validation_reply: Mutex<Option<Result<ValidationResult, ApiError>>>,
        commits: AtomicUsize,
        validations: AtomicUsize,
    }

    #[async_trait]
    impl ReviewBackend for Instrumented {
        async fn fetch_unit(&self, unit_id: &str) -> Result<TextUnit, ApiError> {
            self.store.fetch_unit(unit_id).await
        }

        async fn commit_unit(
            &self,
            unit_id: &str,
            payload: &CommitPayload,
            expected: &VersionToken,
            override_conflict: bool,
        ) -> Result<CommitOutcome, ApiError> {
            let delay = self.commit_delays.lock().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.fail_next_commit.lock().take() {
                return Err(error);
            }
            self.store
                .commit_unit(unit_id, payload, expected, override_conflict)
                .await
        }
    }

    #[async_trait]
    impl ContentValidator for Instrumented {
        async fn validate(
            &self,
            unit_id: &str,
            content: &str,
        ) -> Result<ValidationResult, ApiError> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            let scripted = self.validation_reply.lock().clone();
            match scripted {
                Some(reply) => reply,
                None => self.store.validate(unit_id, content).await,
            }
        }
    }

    async fn harness(validate: bool) -> (Arc<Instrumented>, MutationCoordinator, VersionToken) {
        let backend = Arc::new(Instrumented::default());
        let mut unit = TextUnit::new("greeting", "Hello {name}");
        unit.content = "Bonjour {name}".to_string();
        unit.status = UnitStatus::Translated;
        let t1 = unit.version_token.clone();
        backend.store.insert(unit).await;
        let gate = if validate {
            ValidationGate::new(backend.clone())
        } else {
            ValidationGate::disabled()
        };
        let coordinator = MutationCoordinator::new(backend.clone(), gate);
        match coordinator.load("greeting").await {
            MutationOutcome::Adopted(unit) => assert_eq!(unit.version_token, t1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        (backend, coordinator, t1)
    }

    fn external_edit(content: &str) -> CommitPayload {
        CommitPayload {
            content: Some(content.to_string()),
            status: None,
            decision_state: DecisionState::Pending,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_latest_attempt_reaches_the_cache() {
        let (backend, coordinator, _) = harness(false).await;
        backend
            .commit_delays
            .lock()
            .extend([Duration::from_millis(300), Duration::from_millis(50)]);

        let (first, second) = tokio::join!(
            coordinator.save_content("greeting", "Salut {name}"),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                coordinator
                    .save_content("greeting", "Bonjour à toi, {name}")
                    .await
            }
        );

        assert!(matches!(first, MutationOutcome::Superseded), "{first:?}");
        assert!(matches!(second, MutationOutcome::Committed(_)), "{second:?}");
        let cached = coordinator.cached("greeting").expect("cached");
        assert_eq!(cached.content, "Bonjour à toi, {name}");
        let live = backend.store.get("greeting").await.expect("unit");
        assert_eq!(cached, live);
        assert_eq!(coordinator.attempt_state("greeting"), Some(AttemptState::Committed));
    }

    #[tokio::test]
    async fn reviewer_conflict_resolved_with_use_mine() {
        let (backend, coordinator, t1) = harness(true).await;
        let v2 = backend
            .store
            .apply_external("greeting", &external_edit("Salut {name}"))
            .await
            .expect("external edit");

        let pending = match coordinator.save_content("greeting", "Coucou {name}").await {
            MutationOutcome::Conflict(pending) => pending,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(pending.snapshot().content, "Salut {name}");
        assert_eq!(pending.snapshot().version_token, v2.version_token);
        assert_eq!(pending.payload().content.as_deref(), Some("Coucou {name}"));
        assert_eq!(
            coordinator.cached("greeting").expect("cached").content,
            "Salut {name}"
        );
        assert_eq!(
            backend.store.get("greeting").await.expect("unit").content,
            "Salut {name}"
        );

        let v3 = match coordinator
            .resolve_conflict(pending, ConflictChoice::UseMine)
            .await
        {
            MutationOutcome::Committed(unit) => unit,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(v3.content, "Coucou {name}");
        assert_ne!(v3.version_token, t1);
        assert_ne!(v3.version_token, v2.version_token);
        assert_eq!(backend.commits.load(Ordering::SeqCst), 2);
        assert_eq!(backend.validations.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.cached("greeting"), Some(v3));
    }

    #[tokio::test]
    async fn use_external_adopts_without_committing() {
        let (backend, coordinator, _) = harness(false).await;
        backend
            .store
            .apply_external("greeting", &external_edit("Salut {name}"))
            .await
            .expect("external edit");
        let MutationOutcome::Conflict(pending) =
            coordinator.save_content("greeting", "Coucou {name}").await
        else {
            panic!("expected conflict");
        };
        let outcome = coordinator
            .resolve_conflict(
                pending,
                ConflictChoice::UseExternal {
                    finalize_decision: false,
                },
            )
            .await;
        let adopted = match outcome {
            MutationOutcome::Adopted(unit) => unit,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(adopted.content, "Salut {name}");
        assert_eq!(backend.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn use_external_can_finalize_the_decision() {
        let (backend, coordinator, _) = harness(false).await;
        backend
            .store
            .apply_external("greeting", &external_edit("Salut {name}"))
            .await
            .expect("external edit");
        let MutationOutcome::Conflict(pending) = coordinator
            .change_decision("greeting", DecisionTransition::Decide)
            .await
        else {
            panic!("expected conflict");
        };
        let outcome = coordinator
            .resolve_conflict(
                pending,
                ConflictChoice::UseExternal {
                    finalize_decision: true,
                },
            )
            .await;
        let unit = match outcome {
            MutationOutcome::Committed(unit) => unit,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(unit.content, "Salut {name}");
        assert_eq!(unit.decision_state, DecisionState::Decided);
    }

    #[tokio::test]
    async fn failed_validation_then_commit_anyway_commits_once() {
        let (backend, coordinator, _) = harness(true).await;
        let pending = match coordinator.save_content("greeting", "Bonjour").await {
            MutationOutcome::NeedsConfirmation(pending) => pending,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(pending.prompt().contains("found a problem"));
        assert!(pending.prompt().contains("{name}"));
        assert_eq!(
            coordinator.attempt_state("greeting"),
            Some(AttemptState::AwaitingConfirmation)
        );
        assert_eq!(backend.commits.load(Ordering::SeqCst), 0);

        let unit = match coordinator.confirm(pending).await {
            MutationOutcome::Committed(unit) => unit,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(unit.content, "Bonjour");
        assert_eq!(backend.commits.load(Ordering::SeqCst), 1);
        assert_eq!(backend.validations.load(Ordering::SeqCst), 1);
        assert_eq!(
            backend.store.get("greeting").await.expect("unit").content,
            "Bonjour"
        );
    }

    #[tokio::test]
    async fn unreachable_validator_asks_instead_of_blocking() {
        let (backend, coordinator, _) = harness(true).await;
        *backend.validation_reply.lock() = Some(Err(ApiError::http(503, "validator down")));
        let pending = match coordinator.save_content("greeting", "Salut {name}").await {
            MutationOutcome::NeedsConfirmation(pending) => pending,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(matches!(pending.verdict(), GateVerdict::Inconclusive { .. }));
        assert!(pending.prompt().contains("could not run"));
        assert!(matches!(
            coordinator.confirm(pending).await,
            MutationOutcome::Committed(_)
        ));
    }

    #[tokio::test]
    async fn newer_action_supersedes_a_pending_confirmation() {
        let (backend, coordinator, _) = harness(true).await;
        let MutationOutcome::NeedsConfirmation(pending) =
            coordinator.save_content("greeting", "Bonjour").await
        else {
            panic!("expected confirmation");
        };
        assert!(matches!(
            coordinator
                .change_status("greeting", UnitStatus::NeedsReview)
                .await,
            MutationOutcome::Committed(_)
        ));
        assert!(matches!(
            coordinator.confirm(pending).await,
            MutationOutcome::Superseded
        ));
        assert_eq!(backend.commits.load(Ordering::SeqCst), 1);
        let live = backend.store.get("greeting").await.expect("unit");
        assert_eq!(live.content, "Bonjour {name}");
        assert_eq!(live.status, UnitStatus::NeedsReview);
    }

    #[tokio::test]
    async fn decision_and_status_changes_skip_validation() {
        let (backend, coordinator, _) = harness(true).await;
        let decided = match coordinator
            .change_decision("greeting", DecisionTransition::Decide)
            .await
        {
            MutationOutcome::Committed(unit) => unit,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(decided.decision_state, DecisionState::Decided);
        assert_eq!(decided.content, "Bonjour {name}");

        let accepted = match coordinator
            .change_status("greeting", UnitStatus::Accepted)
            .await
        {
            MutationOutcome::Committed(unit) => unit,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(accepted.status, UnitStatus::Accepted);
        assert_eq!(accepted.decision_state, DecisionState::Decided);
        assert_eq!(backend.validations.load(Ordering::SeqCst), 0);
        assert_eq!(backend.commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected_before_any_request() {
        let (backend, coordinator, _) = harness(false).await;
        match coordinator
            .change_decision("greeting", DecisionTransition::Reopen)
            .await
        {
            MutationOutcome::Failed(CommitFailure::InvalidTransition(_)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(backend.commits.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.attempt_state("greeting"), Some(AttemptState::Failed));
    }

    #[tokio::test]
    async fn save_and_decide_is_one_commit() {
        let (backend, coordinator, _) = harness(true).await;
        let unit = match coordinator
            .save_and_decide("greeting", "Salut {name}")
            .await
        {
            MutationOutcome::Committed(unit) => unit,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(unit.content, "Salut {name}");
        assert_eq!(unit.decision_state, DecisionState::Decided);
        assert_eq!(backend.commits.load(Ordering::SeqCst), 1);
        assert_eq!(backend.validations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_without_retry_leaves_the_cache_alone() {
        let (backend, coordinator, t1) = harness(false).await;
        *backend.fail_next_commit.lock() = Some(ApiError::http(503, "maintenance"));
        match coordinator.save_content("greeting", "Salut {name}").await {
            MutationOutcome::Failed(CommitFailure::Transient(error)) => {
                assert_eq!(error.status, Some(503))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let cached = coordinator.cached("greeting").expect("cached");
        assert_eq!(cached.version_token, t1);
        assert_eq!(coordinator.attempt_state("greeting"), Some(AttemptState::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_when_enabled() {
        let backend = Arc::new(Instrumented::default());
        backend.store.insert(TextUnit::new("greeting", "Hello")).await;
        *backend.fail_next_commit.lock() = Some(ApiError::network("connection reset by peer"));
        let coordinator = MutationCoordinator::new(backend.clone(), ValidationGate::disabled())
            .with_commit_retry(Some(CommitRetry::default()));
        assert!(matches!(
            coordinator.save_content("greeting", "Bonjour").await,
            MutationOutcome::Committed(_)
        ));
        assert_eq!(backend.commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_without_deadline_still_commits() {
        let backend = Arc::new(Instrumented::default());
        backend.store.insert(TextUnit::new("greeting", "Hello")).await;
        *backend.fail_next_commit.lock() = Some(ApiError::http(503, "unavailable"));
        let retry = crate::config::CommitRetryConfig {
            timeout_ms: 0,
            ..Default::default()
        }
        .retry();
        assert_eq!(retry.map(|retry| retry.timeout), Some(None));
        let coordinator = MutationCoordinator::new(backend.clone(), ValidationGate::disabled())
            .with_commit_retry(retry);
        match coordinator.save_content("greeting", "Bonjour").await {
            MutationOutcome::Committed(unit) => assert_eq!(unit.content, "Bonjour"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(backend.commits.load(Ordering::SeqCst), 2);
        let live = backend.store.get("greeting").await.expect("unit");
        assert_eq!(live.content, "Bonjour");
    }

    #[tokio::test]
    async fn unknown_unit_fails_terminally() {
        let (_, coordinator, _) = harness(false).await;
        match coordinator.save_content("missing", "x").await {
            MutationOutcome::Failed(CommitFailure::Terminal(error)) => {
                assert_eq!(error.status, Some(404))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
