use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use glossa_types::{
    CommitPayload, ConflictSnapshot, TextUnit, UnitStatus, ValidationResult, VersionToken,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::checks::check_translation;
use crate::error::ApiError;
use crate::guard::{CommitOutcome, ReviewBackend};
use crate::validation::ContentValidator;

#[derive(Debug, Clone, Serialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitStoreError {
    #[error("unit not found: {unit_id}")]
    NotFound { unit_id: String },
    #[error("version conflict on unit {}", .0.id)]
    VersionConflict(ConflictSnapshot),
}

/// Seed file row. Only `id` is required.
#[derive(Debug, Deserialize)]
struct SeedUnit {
    id: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    status: Option<UnitStatus>,
}

/// Authoritative unit state with the server-side version rule: a commit
/// applies only when its expected token is the live one or override is set,
/// and every applied commit issues a fresh token.
#[derive(Debug, Default)]
pub struct UnitStore {
    units: RwLock<HashMap<String, TextUnit>>,
}

impl UnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, unit: TextUnit) {
        self.units.write().await.insert(unit.id.clone(), unit);
    }

    pub async fn get(&self, unit_id: &str) -> Option<TextUnit> {
        self.units.read().await.get(unit_id).cloned()
    }

    pub async fn list(&self) -> Vec<TextUnit> {
        let mut rows = self.units.read().await.values().cloned().collect::<Vec<_>>();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    pub async fn commit(
        &self,
        unit_id: &str,
        payload: &CommitPayload,
        expected: &VersionToken,
        override_conflict: bool,
    ) -> Result<TextUnit, UnitStoreError> {
        let mut guard = self.units.write().await;
        let Some(current) = guard.get_mut(unit_id) else {
            return Err(UnitStoreError::NotFound {
                unit_id: unit_id.to_string(),
            });
        };
        if &current.version_token != expected && !override_conflict {
            debug!(
                unit_id,
                expected = %expected,
                live = %current.version_token,
                "review.store.stale_token"
            );
            return Err(UnitStoreError::VersionConflict(current.snapshot()));
        }
        apply_payload(current, payload);
        Ok(current.clone())
    }

    /// Applies a change without a token check, as a background job or another
    /// reviewer's already-accepted write would.
    pub async fn apply_external(
        &self,
        unit_id: &str,
        payload: &CommitPayload,
    ) -> Result<TextUnit, UnitStoreError> {
        let mut guard = self.units.write().await;
        let current = guard
            .get_mut(unit_id)
            .ok_or_else(|| UnitStoreError::NotFound {
                unit_id: unit_id.to_string(),
            })?;
        apply_payload(current, payload);
        Ok(current.clone())
    }

    pub async fn load_seed(&self, path: &Path) -> anyhow::Result<usize> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        let rows: Vec<SeedUnit> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse seed file {}", path.display()))?;
        let count = rows.len();
        let mut guard = self.units.write().await;
        for row in rows {
            let mut unit = TextUnit::new(row.id, row.source);
            if !row.content.is_empty() {
                unit.status = UnitStatus::Translated;
            }
            unit.content = row.content;
            if let Some(status) = row.status {
                unit.status = status;
            }
            guard.insert(unit.id.clone(), unit);
        }
        info!(count, path = %path.display(), "review.store.seeded");
        Ok(count)
    }
}

fn apply_payload(unit: &mut TextUnit, payload: &CommitPayload) {
    if let Some(content) = &payload.content {
        unit.content = content.clone();
    }
    if let Some(status) = payload.status {
        unit.status = status;
    }
    unit.decision_state = payload.decision_state;
    let previous = std::mem::replace(&mut unit.version_token, VersionToken::generate());
    while unit.version_token == previous {
        unit.version_token = VersionToken::generate();
    }
}

fn not_found(unit_id: &str) -> ApiError {
    ApiError::http(404, format!("unit not found: {unit_id}")).with_code("UNIT_NOT_FOUND")
}

#[async_trait]
impl ReviewBackend for UnitStore {
    async fn fetch_unit(&self, unit_id: &str) -> Result<TextUnit, ApiError> {
        self.get(unit_id).await.ok_or_else(|| not_found(unit_id))
    }

    async fn commit_unit(
        &self,
        unit_id: &str,
        payload: &CommitPayload,
        expected: &VersionToken,
        override_conflict: bool,
    ) -> Result<CommitOutcome, ApiError> {
        match self
            .commit(unit_id, payload, expected, override_conflict)
            .await
        {
            Ok(unit) => Ok(CommitOutcome::Applied(unit)),
            Err(UnitStoreError::VersionConflict(snapshot)) => Ok(CommitOutcome::Conflict(snapshot)),
            Err(UnitStoreError::NotFound { unit_id }) => Err(not_found(&unit_id)),
        }
    }
}

#[async_trait]
impl ContentValidator for UnitStore {
    async fn validate(&self, unit_id: &str, content: &str) -> Result<ValidationResult, ApiError> {
        let unit = self.get(unit_id).await.ok_or_else(|| not_found(unit_id))?;
        Ok(check_translation(&unit.source, content))
    }
}
