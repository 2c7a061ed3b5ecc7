use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use glossa_types::{CommitPayload, ConflictSnapshot, TextUnit, VersionToken};
use tracing::{debug, info, warn};

use crate::classifier::TransientErrorClassifier;
use crate::error::{ApiError, CommitFailure};
use crate::poller::{poll, PollError, PollPolicy};

/// A commit response, decoded once at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied(TextUnit),
    Conflict(ConflictSnapshot),
}

#[async_trait]
pub trait ReviewBackend: Send + Sync {
    async fn fetch_unit(&self, unit_id: &str) -> Result<TextUnit, ApiError>;

    async fn commit_unit(
        &self,
        unit_id: &str,
        payload: &CommitPayload,
        expected: &VersionToken,
        override_conflict: bool,
    ) -> Result<CommitOutcome, ApiError>;
}

#[derive(Debug, Clone)]
pub enum CommitResult {
    Applied(TextUnit),
    Conflict(ConflictSnapshot),
    Failed(CommitFailure),
}

/// Retry schedule for transient commit failures. Runs on the poller, so the
/// deadline and backoff rules match every other long-running wait. A `None`
/// timeout keeps retrying until the attempt is superseded or the server
/// answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRetry {
    pub interval: Duration,
    pub max_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for CommitRetry {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(4),
            timeout: Some(Duration::from_secs(15)),
        }
    }
}

/// Optimistic-concurrency commit path. The server decides whether a token is
/// stale; this only sends the expected token and sorts the answer.
#[derive(Clone)]
pub struct ConcurrencyGuard {
    backend: Arc<dyn ReviewBackend>,
    retry: Option<CommitRetry>,
}

impl ConcurrencyGuard {
    pub fn new(backend: Arc<dyn ReviewBackend>) -> Self {
        Self {
            backend,
            retry: None,
        }
    }

    pub fn with_retry(mut self, retry: Option<CommitRetry>) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ReviewBackend> {
        &self.backend
    }

    pub async fn commit(
        &self,
        unit_id: &str,
        payload: &CommitPayload,
        expected: &VersionToken,
        override_conflict: bool,
    ) -> CommitResult {
        match self
            .commit_if(unit_id, payload, expected, override_conflict, || true)
            .await
        {
            Some(result) => result,
            None => CommitResult::Failed(CommitFailure::Timeout {
                message: format!("commit of unit {unit_id} was abandoned"),
            }),
        }
    }

    /// Commits, retrying transient failures while `still_current` holds.
    /// Returns `None` once `still_current` turns false; no further request is
    /// sent after that.
    pub async fn commit_if(
        &self,
        unit_id: &str,
        payload: &CommitPayload,
        expected: &VersionToken,
        override_conflict: bool,
        still_current: impl Fn() -> bool,
    ) -> Option<CommitResult> {
        let Some(retry) = self.retry else {
            if !still_current() {
                return None;
            }
            let result = self
                .backend
                .commit_unit(unit_id, payload, expected, override_conflict)
                .await;
            return Some(self.settle(unit_id, result));
        };

        let policy: PollPolicy<Option<CommitOutcome>> =
            PollPolicy::new(retry.interval, |_| true).with_max_interval(retry.max_interval);
        let policy = match retry.timeout {
            Some(timeout) => {
                policy.with_timeout(timeout, format!("commit of unit {unit_id} kept failing"))
            }
            None => policy.unbounded(),
        };
        let backend = &self.backend;
        let still_current = &still_current;
        let attempt = move || async move {
            if !still_current() {
                return Ok(None);
            }
            backend
                .commit_unit(unit_id, payload, expected, override_conflict)
                .await
                .map(Some)
        };

        match poll(attempt, &policy).await {
            Ok(Some(outcome)) => Some(self.settle(unit_id, Ok(outcome))),
            Ok(None) => None,
            Err(PollError::Aborted(error)) => Some(self.settle(unit_id, Err(error))),
            Err(PollError::Timeout { message, elapsed }) => {
                warn!(
                    unit_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "review.commit.retry_exhausted"
                );
                Some(CommitResult::Failed(CommitFailure::Timeout { message }))
            }
            Err(PollError::Cancelled) => None,
        }
    }

    fn settle(&self, unit_id: &str, result: Result<CommitOutcome, ApiError>) -> CommitResult {
        match result {
            Ok(CommitOutcome::Applied(unit)) => {
                debug!(
                    unit_id,
                    version_token = %unit.version_token,
                    "review.commit.applied"
                );
                CommitResult::Applied(unit)
            }
            Ok(CommitOutcome::Conflict(snapshot)) => {
                info!(
                    unit_id,
                    live_token = %snapshot.version_token,
                    "review.commit.conflict"
                );
                CommitResult::Conflict(snapshot)
            }
            Err(error) if TransientErrorClassifier::shared().is_transient(&error) => {
                warn!(unit_id, error = %error, "review.commit.transient_failure");
                CommitResult::Failed(CommitFailure::Transient(error))
            }
            Err(error) => {
                warn!(unit_id, error = %error, "review.commit.rejected");
                CommitResult::Failed(CommitFailure::Terminal(error))
            }
        }
    }
}
