use std::time::Duration;

use async_trait::async_trait;
use glossa_types::{AsyncTask, TaskKind};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ApiError;
use crate::poller::{poll, poll_cancellable, PollError, PollPolicy};

#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn task_status(&self, task_id: &str) -> Result<AsyncTask, ApiError>;
}

#[derive(Debug, Error)]
pub enum TaskWaitError {
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error("{kind} task {task_id} failed: {message}")]
    TaskFailed {
        kind: &'static str,
        task_id: String,
        message: String,
    },
}

/// Poll settings for one kind of long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPollSettings {
    pub interval: Duration,
    pub max_interval: Duration,
    pub timeout: Option<Duration>,
}

impl TaskPollSettings {
    pub fn policy(&self, kind: TaskKind) -> PollPolicy<AsyncTask> {
        let policy = PollPolicy::new(self.interval, |task: &AsyncTask| task.done)
            .with_max_interval(self.max_interval);
        match self.timeout {
            Some(timeout) => policy.with_timeout(timeout, timeout_message(kind)),
            None => policy.unbounded(),
        }
    }
}

fn timeout_message(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::BatchTranslation => "batch translation is still running",
        TaskKind::ProjectCreation => "project creation did not finish in time",
        TaskKind::Search => "search did not return results in time",
    }
}

/// Waits for `task` to finish. A task that finishes with an error message is
/// reported as [`TaskWaitError::TaskFailed`].
pub async fn wait_for_task(
    source: &dyn TaskSource,
    task: &AsyncTask,
    policy: &PollPolicy<AsyncTask>,
    cancel: Option<&CancellationToken>,
) -> Result<AsyncTask, TaskWaitError> {
    if task.done {
        return finished(task.clone());
    }
    let task_id = task.id.as_str();
    let fetch = || source.task_status(task_id);
    let done = match cancel {
        Some(token) => poll_cancellable(fetch, policy, token).await?,
        None => poll(fetch, policy).await?,
    };
    info!(
        task_id,
        kind = done.kind.as_str(),
        failed = done.failed(),
        "review.task.finished"
    );
    finished(done)
}

fn finished(task: AsyncTask) -> Result<AsyncTask, TaskWaitError> {
    match task.error_message {
        Some(message) if task.done => Err(TaskWaitError::TaskFailed {
            kind: task.kind.as_str(),
            task_id: task.id,
            message,
        }),
        _ => Ok(task),
    }
}
