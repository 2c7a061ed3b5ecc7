use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use glossa_core::config::ReviewConfig;
use glossa_core::tasks::{wait_for_task, TaskPollSettings, TaskSource, TaskWaitError};
use glossa_core::{ApiError, CommitOutcome, ContentValidator, ReviewBackend};
use glossa_types::{AsyncTask, CommitPayload, TaskKind, TextUnit, ValidationResult, VersionToken};
use glossa_wire::{
    BatchTranslationRequest, CommitRequest, ConflictEnvelope, CreateProjectRequest, ErrorEnvelope,
    SearchRequest, TaskEnvelope, UnitEnvelope, ValidateRequest,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Poll settings for each long-running operation the API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPolicies {
    pub batch_translation: TaskPollSettings,
    pub project_creation: TaskPollSettings,
    pub search: TaskPollSettings,
}

impl TaskPolicies {
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self {
            batch_translation: config.polling.batch_translation.task_settings(),
            project_creation: config.polling.project_creation.task_settings(),
            search: config.polling.search.task_settings(),
        }
    }
}

#[derive(Deserialize)]
struct UnitList {
    units: Vec<TextUnit>,
}

#[derive(Clone)]
pub struct ReviewClient {
    base_url: String,
    client: Client,
    api_token: Option<String>,
    policies: TaskPolicies,
}

impl ReviewClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Self::from_config(&ReviewConfig {
            server: glossa_core::config::ServerConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    pub fn from_config(config: &ReviewConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: config.server.base_url.trim_end_matches('/').to_string(),
            client,
            api_token: config.server.api_token.clone(),
            policies: TaskPolicies::from_config(config),
        })
    }

    pub fn with_policies(mut self, policies: TaskPolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        self.authorized(request).send().await.map_err(transport_error)
    }

    pub async fn list_units(&self) -> Result<Vec<TextUnit>, ApiError> {
        let resp = self.send(self.client.get(self.url("/units"))).await?;
        Ok(decode::<UnitList>(resp).await?.units)
    }

    pub async fn start_batch_translation(
        &self,
        unit_ids: Vec<String>,
    ) -> Result<AsyncTask, ApiError> {
        let request = self
            .client
            .post(self.url("/tasks/batch-translation"))
            .json(&BatchTranslationRequest { unit_ids });
        Ok(decode::<TaskEnvelope>(self.send(request).await?).await?.task)
    }

    pub async fn start_project_creation(
        &self,
        name: impl Into<String>,
        source_locale: impl Into<String>,
        target_locales: Vec<String>,
    ) -> Result<AsyncTask, ApiError> {
        let request = self
            .client
            .post(self.url("/projects"))
            .json(&CreateProjectRequest {
                name: name.into(),
                source_locale: source_locale.into(),
                target_locales,
            });
        Ok(decode::<TaskEnvelope>(self.send(request).await?).await?.task)
    }

    pub async fn start_search(&self, query: impl Into<String>) -> Result<AsyncTask, ApiError> {
        let request = self.client.post(self.url("/search")).json(&SearchRequest {
            query: query.into(),
        });
        Ok(decode::<TaskEnvelope>(self.send(request).await?).await?.task)
    }

    /// Batch translation may run for a long time; by default there is no
    /// deadline and only `cancel` ends the wait early.
    pub async fn wait_for_batch_translation(
        &self,
        task: &AsyncTask,
        cancel: Option<&CancellationToken>,
    ) -> Result<AsyncTask, TaskWaitError> {
        let policy = self
            .policies
            .batch_translation
            .policy(TaskKind::BatchTranslation);
        wait_for_task(self, task, &policy, cancel).await
    }

    pub async fn wait_for_project_creation(
        &self,
        task: &AsyncTask,
    ) -> Result<AsyncTask, TaskWaitError> {
        let policy = self
            .policies
            .project_creation
            .policy(TaskKind::ProjectCreation);
        wait_for_task(self, task, &policy, None).await
    }

    pub async fn wait_for_search(&self, task: &AsyncTask) -> Result<AsyncTask, TaskWaitError> {
        let policy = self.policies.search.policy(TaskKind::Search);
        wait_for_task(self, task, &policy, None).await
    }
}

#[async_trait]
impl ReviewBackend for ReviewClient {
    async fn fetch_unit(&self, unit_id: &str) -> Result<TextUnit, ApiError> {
        let resp = self
            .send(self.client.get(self.url(&format!("/units/{unit_id}"))))
            .await?;
        Ok(decode::<UnitEnvelope>(resp).await?.unit)
    }

    async fn commit_unit(
        &self,
        unit_id: &str,
        payload: &CommitPayload,
        expected: &VersionToken,
        override_conflict: bool,
    ) -> Result<CommitOutcome, ApiError> {
        let body = CommitRequest {
            payload: payload.clone(),
            expected_version_token: expected.clone(),
            override_conflict,
        };
        let request = self
            .client
            .put(self.url(&format!("/units/{unit_id}")))
            .json(&body);
        let resp = self.send(request).await?;
        if resp.status() != StatusCode::CONFLICT {
            return Ok(CommitOutcome::Applied(decode::<UnitEnvelope>(resp).await?.unit));
        }

        let raw = resp.text().await.map_err(transport_error)?;
        match serde_json::from_str::<ConflictEnvelope>(&raw) {
            Ok(envelope) => Ok(CommitOutcome::Conflict(envelope.snapshot)),
            Err(error) => {
                warn!(
                    unit_id,
                    error = %error,
                    "review.client.conflict_body_unreadable"
                );
                let live = self.fetch_unit(unit_id).await?;
                Ok(CommitOutcome::Conflict(live.snapshot()))
            }
        }
    }
}

#[async_trait]
impl ContentValidator for ReviewClient {
    async fn validate(&self, unit_id: &str, content: &str) -> Result<ValidationResult, ApiError> {
        let request = self.client.post(self.url("/validate")).json(&ValidateRequest {
            unit_id: unit_id.to_string(),
            content: content.to_string(),
        });
        decode::<ValidationResult>(self.send(request).await?).await
    }
}

#[async_trait]
impl TaskSource for ReviewClient {
    async fn task_status(&self, task_id: &str) -> Result<AsyncTask, ApiError> {
        let resp = self
            .send(self.client.get(self.url(&format!("/tasks/{task_id}"))))
            .await?;
        Ok(decode::<TaskEnvelope>(resp).await?.task)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(error_from_response(status, resp).await);
    }
    resp.json::<T>()
        .await
        .map_err(|error| ApiError::decode(format!("unexpected response body: {error}")))
}

async fn error_from_response(status: StatusCode, resp: Response) -> ApiError {
    let raw = resp.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "review.client.error_response");
    match serde_json::from_str::<ErrorEnvelope>(&raw) {
        Ok(envelope) => {
            let error = ApiError::http(status.as_u16(), envelope.error);
            match envelope.code {
                Some(code) => error.with_code(code),
                None => error,
            }
        }
        Err(_) => {
            let message = match raw.trim() {
                "" => status.canonical_reason().unwrap_or("request failed").to_string(),
                body => body.to_string(),
            };
            ApiError::http(status.as_u16(), message)
        }
    }
}

fn transport_error(error: reqwest::Error) -> ApiError {
    if error.is_decode() {
        return ApiError::decode(error.to_string());
    }
    let api_error = ApiError::network(error.to_string());
    if error.is_timeout() || error.is_connect() {
        api_error.with_transient(true)
    } else {
        api_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = ReviewClient::new("http://127.0.0.1:39741/").expect("client");
        assert_eq!(client.base_url(), "http://127.0.0.1:39741");
        assert_eq!(client.url("/units/a"), "http://127.0.0.1:39741/units/a");
    }

    #[test]
    fn policies_follow_config() {
        let config = ReviewConfig::default();
        let policies = TaskPolicies::from_config(&config);
        assert_eq!(policies.batch_translation.timeout, None);
        assert_eq!(
            policies.project_creation.timeout,
            Some(Duration::from_secs(120))
        );
    }
}
