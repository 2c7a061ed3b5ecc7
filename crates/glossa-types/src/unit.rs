use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque marker of an observed unit state.
///
/// A new token is issued on every accepted commit; clients only ever compare
/// tokens for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    New,
    Translated,
    NeedsReview,
    Accepted,
    Rejected,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::New => "new",
            UnitStatus::Translated => "translated",
            UnitStatus::NeedsReview => "needs_review",
            UnitStatus::Accepted => "accepted",
            UnitStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "new" => Some(UnitStatus::New),
            "translated" => Some(UnitStatus::Translated),
            "needs_review" => Some(UnitStatus::NeedsReview),
            "accepted" => Some(UnitStatus::Accepted),
            "rejected" => Some(UnitStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a reviewer has finalized judgement on a unit, independent of its
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    Pending,
    Decided,
}

impl DecisionState {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionState::Pending => "pending",
            DecisionState::Decided => "decided",
        }
    }
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A translatable text unit as held by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: String,
    #[serde(default)]
    pub source: String,
    pub content: String,
    pub status: UnitStatus,
    pub decision_state: DecisionState,
    pub version_token: VersionToken,
}

impl TextUnit {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            content: String::new(),
            status: UnitStatus::New,
            decision_state: DecisionState::Pending,
            version_token: VersionToken::generate(),
        }
    }

    pub fn snapshot(&self) -> ConflictSnapshot {
        ConflictSnapshot {
            id: self.id.clone(),
            source: self.source.clone(),
            content: self.content.clone(),
            status: self.status,
            decision_state: self.decision_state,
            version_token: self.version_token.clone(),
        }
    }
}

/// Live server state returned when a commit loses the version race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSnapshot {
    pub id: String,
    #[serde(default)]
    pub source: String,
    pub content: String,
    pub status: UnitStatus,
    pub decision_state: DecisionState,
    pub version_token: VersionToken,
}

impl From<ConflictSnapshot> for TextUnit {
    fn from(snapshot: ConflictSnapshot) -> Self {
        Self {
            id: snapshot.id,
            source: snapshot.source,
            content: snapshot.content,
            status: snapshot.status,
            decision_state: snapshot.decision_state,
            version_token: snapshot.version_token,
        }
    }
}

/// Fields a single commit may change. `decision_state` is always sent so the
/// server never has to infer it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UnitStatus>,
    pub decision_state: DecisionState,
}

impl CommitPayload {
    pub fn changes_content(&self) -> bool {
        self.content.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ValidationResult {
    pub fn passed() -> Self {
        Self {
            passed: true,
            detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: Some(detail.into()),
        }
    }
}
