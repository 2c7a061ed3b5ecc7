use glossa_types::{AsyncTask, CommitPayload, ConflictSnapshot, TextUnit, VersionToken};
use serde::{Deserialize, Serialize};

pub const CODE_VERSION_CONFLICT: &str = "VERSION_CONFLICT";
pub const CODE_UNIT_NOT_FOUND: &str = "UNIT_NOT_FOUND";
pub const CODE_TASK_NOT_FOUND: &str = "TASK_NOT_FOUND";
pub const CODE_INVALID_REQUEST: &str = "INVALID_REQUEST";

/// Body of `PUT /units/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    #[serde(flatten)]
    pub payload: CommitPayload,
    pub expected_version_token: VersionToken,
    #[serde(rename = "override", default)]
    pub override_conflict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitEnvelope {
    pub unit: TextUnit,
}

/// Body of a `409` commit response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEnvelope {
    pub error: String,
    pub code: String,
    pub snapshot: ConflictSnapshot,
}

impl ConflictEnvelope {
    pub fn new(snapshot: ConflictSnapshot) -> Self {
        Self {
            error: "Unit version conflict".to_string(),
            code: CODE_VERSION_CONFLICT.to_string(),
            snapshot,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub unit_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task: AsyncTask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTranslationRequest {
    pub unit_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub source_locale: String,
    #[serde(default)]
    pub target_locales: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}
