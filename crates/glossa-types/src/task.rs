use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    BatchTranslation,
    ProjectCreation,
    Search,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::BatchTranslation => "batch_translation",
            TaskKind::ProjectCreation => "project_creation",
            TaskKind::Search => "search",
        }
    }
}

/// Handle to a server-side long-running operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncTask {
    pub id: String,
    pub kind: TaskKind,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl AsyncTask {
    pub fn pending(kind: TaskKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            done: false,
            error_message: None,
            result: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.done && self.error_message.is_some()
    }
}
