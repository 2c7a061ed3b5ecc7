//! Repeat-until-done polling for long-running backend operations.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! Waiting -> Calling -> Stop
//!                    -> Waiting            (success, not done yet)
//!                    -> Backoff -> Waiting (transient failure)
//!                    -> Abort              (terminal failure)
//! ```
//!
//! The deadline is checked before every call and waits are clamped to the
//! remaining time, so a timeout fires at the deadline rather than one interval
//! later. There is no retry count: transient failures are retried until the
//! deadline, or forever when no deadline is set.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::classifier::TransientErrorClassifier;
use crate::error::ApiError;

pub type StopFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub type TransientFn = Arc<dyn Fn(&ApiError) -> bool + Send + Sync>;

const DEFAULT_TIMEOUT_MESSAGE: &str = "operation did not complete in time";

#[derive(Debug, Error)]
pub enum PollError {
    #[error("{message} (gave up after {elapsed:?})")]
    Timeout { message: String, elapsed: Duration },
    #[error("polling aborted: {0}")]
    Aborted(#[source] ApiError),
    #[error("polling cancelled")]
    Cancelled,
}

pub struct PollPolicy<T> {
    pub interval: Duration,
    pub max_interval: Duration,
    pub timeout: Option<Duration>,
    pub timeout_message: String,
    is_transient: TransientFn,
    should_stop: StopFn<T>,
}

impl<T> Clone for PollPolicy<T> {
    fn clone(&self) -> Self {
        Self {
            interval: self.interval,
            max_interval: self.max_interval,
            timeout: self.timeout,
            timeout_message: self.timeout_message.clone(),
            is_transient: self.is_transient.clone(),
            should_stop: self.should_stop.clone(),
        }
    }
}

impl<T> std::fmt::Debug for PollPolicy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollPolicy")
            .field("interval", &self.interval)
            .field("max_interval", &self.max_interval)
            .field("timeout", &self.timeout)
            .field("timeout_message", &self.timeout_message)
            .finish_non_exhaustive()
    }
}

impl<T> PollPolicy<T> {
    pub fn new(
        interval: Duration,
        should_stop: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            interval,
            max_interval: interval.saturating_mul(16),
            timeout: None,
            timeout_message: DEFAULT_TIMEOUT_MESSAGE.to_string(),
            is_transient: Arc::new(|error: &ApiError| {
                TransientErrorClassifier::shared().is_transient(error)
            }),
            should_stop: Arc::new(should_stop),
        }
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval.max(self.interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration, message: impl Into<String>) -> Self {
        self.timeout = Some(timeout);
        self.timeout_message = message.into();
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_transient_classifier(
        mut self,
        is_transient: impl Fn(&ApiError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_transient = Arc::new(is_transient);
        self
    }

    pub fn should_stop(&self, value: &T) -> bool {
        (self.should_stop)(value)
    }

    pub fn is_transient(&self, error: &ApiError) -> bool {
        (self.is_transient)(error)
    }

    /// `min(interval * 2^(failures - 1), max_interval)`
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.interval
            .saturating_mul(1u32 << exponent)
            .min(self.max_interval)
    }
}

enum PollPhase<T> {
    Waiting(Duration),
    Calling,
    Backoff { failures: u32 },
    Stop(T),
    Abort(ApiError),
}

pub async fn poll<T, F, Fut>(fetch_status: F, policy: &PollPolicy<T>) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    run(fetch_status, policy, None).await
}

/// Like [`poll`], but gives up with [`PollError::Cancelled`] as soon as
/// `cancel` fires. Used for unbounded waits the user can abandon.
pub async fn poll_cancellable<T, F, Fut>(
    fetch_status: F,
    policy: &PollPolicy<T>,
    cancel: &CancellationToken,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    run(fetch_status, policy, Some(cancel)).await
}

async fn run<T, F, Fut>(
    mut fetch_status: F,
    policy: &PollPolicy<T>,
    cancel: Option<&CancellationToken>,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let started = Instant::now();
    let mut failures: u32 = 0;
    let mut phase = PollPhase::Calling;

    loop {
        phase = match phase {
            PollPhase::Waiting(delay) => {
                let delay = clamp_to_deadline(delay, started, policy.timeout);
                trace!(delay_ms = delay.as_millis() as u64, "review.poll.waiting");
                match cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => return Err(PollError::Cancelled),
                            _ = sleep(delay) => {}
                        }
                    }
                    None => sleep(delay).await,
                }
                PollPhase::Calling
            }
            PollPhase::Calling => {
                let elapsed = started.elapsed();
                if let Some(timeout) = policy.timeout {
                    if elapsed >= timeout {
                        warn!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            timeout_ms = timeout.as_millis() as u64,
                            "review.poll.timeout"
                        );
                        return Err(PollError::Timeout {
                            message: policy.timeout_message.clone(),
                            elapsed,
                        });
                    }
                }
                let outcome = match cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => return Err(PollError::Cancelled),
                            outcome = fetch_status() => outcome,
                        }
                    }
                    None => fetch_status().await,
                };
                match outcome {
                    Ok(value) if policy.should_stop(&value) => PollPhase::Stop(value),
                    Ok(_) => {
                        failures = 0;
                        PollPhase::Waiting(policy.interval)
                    }
                    Err(error) if policy.is_transient(&error) => {
                        failures = failures.saturating_add(1);
                        debug!(failures, error = %error, "review.poll.transient_failure");
                        PollPhase::Backoff { failures }
                    }
                    Err(error) => PollPhase::Abort(error),
                }
            }
            PollPhase::Backoff { failures } => PollPhase::Waiting(policy.backoff_delay(failures)),
            PollPhase::Stop(value) => return Ok(value),
            PollPhase::Abort(error) => {
                debug!(error = %error, "review.poll.aborted");
                return Err(PollError::Aborted(error));
            }
        };
    }
}

fn clamp_to_deadline(delay: Duration, started: Instant, timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(timeout) => delay.min(timeout.saturating_sub(started.elapsed())),
        None => delay,
    }
}
