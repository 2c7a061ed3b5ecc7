use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use glossa_core::UnitStore;
use glossa_observability::{emit_event, ObservabilityEvent, ProcessKind};
use glossa_types::{AsyncTask, CommitPayload, TaskKind, UnitStatus};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::Level;

mod http;

pub use http::{app_router, serve, serve_on};

const DEFAULT_TASK_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
struct TaskEntry {
    task: AsyncTask,
    finished_at: Option<Instant>,
}

impl TaskEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        self.finished_at
            .is_some_and(|finished| now.saturating_duration_since(finished) > ttl)
    }
}

/// Long-running jobs and their current status, keyed by task id. Finished
/// tasks stay readable for `ttl`, then are dropped.
#[derive(Clone)]
pub struct TaskBoard {
    tasks: Arc<RwLock<HashMap<String, TaskEntry>>>,
    ttl: Duration,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TASK_TTL)
    }
}

impl TaskBoard {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn insert(&self, task: AsyncTask) {
        let mut guard = self.tasks.write().await;
        let (now, ttl) = (Instant::now(), self.ttl);
        guard.retain(|_, entry| !entry.is_expired(now, ttl));
        guard.insert(
            task.id.clone(),
            TaskEntry {
                task,
                finished_at: None,
            },
        );
    }

    pub async fn get(&self, task_id: &str) -> Option<AsyncTask> {
        let mut guard = self.tasks.write().await;
        let (now, ttl) = (Instant::now(), self.ttl);
        guard.retain(|_, entry| !entry.is_expired(now, ttl));
        guard.get(task_id).map(|entry| entry.task.clone())
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn finish(&self, task_id: &str, result: Result<Value, String>) {
        let mut guard = self.tasks.write().await;
        let Some(entry) = guard.get_mut(task_id) else {
            return;
        };
        entry.task.done = true;
        entry.finished_at = Some(Instant::now());
        match result {
            Ok(value) => entry.task.result = Some(value),
            Err(message) => entry.task.error_message = Some(message),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub units: Arc<UnitStore>,
    pub tasks: TaskBoard,
    /// How long simulated jobs take before they finish.
    pub job_delay: Duration,
}

impl AppState {
    pub fn new(units: Arc<UnitStore>) -> Self {
        Self {
            units,
            tasks: TaskBoard::default(),
            job_delay: Duration::from_millis(1_500),
        }
    }

    pub fn with_task_ttl(mut self, ttl: Duration) -> Self {
        self.tasks = TaskBoard::with_ttl(ttl);
        self
    }

    pub fn with_job_delay(mut self, job_delay: Duration) -> Self {
        self.job_delay = job_delay;
        self
    }

    pub async fn start_batch_translation(&self, unit_ids: Vec<String>) -> AsyncTask {
        let units = self.units.clone();
        self.start(TaskKind::BatchTranslation, async move {
            run_batch_translation(&units, &unit_ids).await
        })
        .await
    }

    pub async fn start_project_creation(
        &self,
        name: String,
        source_locale: String,
        target_locales: Vec<String>,
    ) -> AsyncTask {
        self.start(TaskKind::ProjectCreation, async move {
            create_project(&name, &source_locale, &target_locales)
        })
        .await
    }

    pub async fn start_search(&self, query: String) -> AsyncTask {
        let units = self.units.clone();
        self.start(TaskKind::Search, async move {
            Ok(search_units(&units, &query).await)
        })
        .await
    }

    async fn start<F>(&self, kind: TaskKind, job: F) -> AsyncTask
    where
        F: std::future::Future<Output = Result<Value, String>> + Send + 'static,
    {
        let task = AsyncTask::pending(kind);
        self.tasks.insert(task.clone()).await;
        emit_event(
            Level::INFO,
            ProcessKind::Server,
            ObservabilityEvent::new("task.started", "glossa-server")
                .task(&task.id)
                .status(kind.as_str()),
        );

        let board = self.tasks.clone();
        let delay = self.job_delay;
        let task_id = task.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = job.await;
            let level = if result.is_ok() { Level::INFO } else { Level::WARN };
            let detail = result.as_ref().err().cloned().unwrap_or_default();
            emit_event(
                level,
                ProcessKind::Server,
                ObservabilityEvent::new("task.finished", "glossa-server")
                    .task(&task_id)
                    .status(kind.as_str())
                    .detail(&detail),
            );
            board.finish(&task_id, result).await;
        });
        task
    }
}

async fn run_batch_translation(units: &UnitStore, unit_ids: &[String]) -> Result<Value, String> {
    let mut translated = 0usize;
    let mut skipped = 0usize;
    for unit_id in unit_ids {
        let Some(unit) = units.get(unit_id).await else {
            return Err(format!("unit not found: {unit_id}"));
        };
        if !unit.content.trim().is_empty() {
            skipped += 1;
            continue;
        }
        // Draft translation: the source text, flagged for review.
        let payload = CommitPayload {
            content: Some(unit.source.clone()),
            status: Some(UnitStatus::NeedsReview),
            decision_state: unit.decision_state,
        };
        units
            .apply_external(unit_id, &payload)
            .await
            .map_err(|error| error.to_string())?;
        translated += 1;
    }
    Ok(json!({ "translated": translated, "skipped": skipped }))
}

fn is_locale_tag(raw: &str) -> bool {
    let mut parts = raw.split('-');
    let language_ok = parts.next().is_some_and(|lang| {
        (2..=3).contains(&lang.len()) && lang.chars().all(|c| c.is_ascii_lowercase())
    });
    let region_ok = match parts.next() {
        None => true,
        Some(region) => region.len() == 2 && region.chars().all(|c| c.is_ascii_uppercase()),
    };
    language_ok && region_ok && parts.next().is_none()
}

fn create_project(
    name: &str,
    source_locale: &str,
    target_locales: &[String],
) -> Result<Value, String> {
    if name.trim().is_empty() {
        return Err("project name is required".to_string());
    }
    if target_locales.is_empty() {
        return Err("at least one target locale is required".to_string());
    }
    if let Some(bad) = std::iter::once(source_locale)
        .chain(target_locales.iter().map(String::as_str))
        .find(|locale| !is_locale_tag(locale))
    {
        return Err(format!("locale {bad} is not supported"));
    }
    Ok(json!({
        "project_id": uuid::Uuid::new_v4().to_string(),
        "name": name.trim(),
        "source_locale": source_locale,
        "target_locales": target_locales,
    }))
}

async fn search_units(units: &UnitStore, query: &str) -> Value {
    let needle = query.trim().to_lowercase();
    let matches = units
        .list()
        .await
        .into_iter()
        .filter(|unit| {
            !needle.is_empty()
                && (unit.source.to_lowercase().contains(&needle)
                    || unit.content.to_lowercase().contains(&needle))
        })
        .collect::<Vec<_>>();
    json!({ "query": query, "matches": matches })
}
