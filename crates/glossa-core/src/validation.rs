use std::sync::Arc;

use async_trait::async_trait;
use glossa_observability::redact_text;
use glossa_types::ValidationResult;
use tracing::{debug, warn};

use crate::error::ApiError;

#[async_trait]
pub trait ContentValidator: Send + Sync {
    async fn validate(&self, unit_id: &str, content: &str) -> Result<ValidationResult, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Passed,
    Skipped,
    /// The check ran and found a problem.
    Failed { detail: Option<String> },
    /// The check itself could not run. Treated like a failure for prompting,
    /// never as a block.
    Inconclusive { reason: String },
}

impl GateVerdict {
    pub fn allows_commit(&self) -> bool {
        matches!(self, GateVerdict::Passed | GateVerdict::Skipped)
    }

    /// Text for the "commit anyway" confirmation, if one is needed.
    pub fn prompt(&self) -> Option<String> {
        match self {
            GateVerdict::Passed | GateVerdict::Skipped => None,
            GateVerdict::Failed { detail: Some(detail) } => Some(format!(
                "The translation check found a problem: {detail}. Commit anyway?"
            )),
            GateVerdict::Failed { detail: None } => {
                Some("The translation check found a problem. Commit anyway?".to_string())
            }
            GateVerdict::Inconclusive { reason } => Some(format!(
                "The translation check could not run ({reason}). Commit without it?"
            )),
        }
    }
}

/// Soft pre-commit check. Failures and infrastructure errors both end in a
/// confirmation prompt; the gate never blocks a commit on its own.
#[derive(Clone)]
pub struct ValidationGate {
    validator: Option<Arc<dyn ContentValidator>>,
}

impl ValidationGate {
    pub fn new(validator: Arc<dyn ContentValidator>) -> Self {
        Self {
            validator: Some(validator),
        }
    }

    pub fn disabled() -> Self {
        Self { validator: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.validator.is_some()
    }

    pub async fn check(&self, unit_id: &str, content: &str) -> GateVerdict {
        let Some(validator) = &self.validator else {
            return GateVerdict::Skipped;
        };
        match validator.validate(unit_id, content).await {
            Ok(result) if result.passed => GateVerdict::Passed,
            Ok(result) => {
                debug!(
                    unit_id,
                    content = %redact_text(content),
                    detail = result.detail.as_deref().unwrap_or(""),
                    "review.validation.failed"
                );
                GateVerdict::Failed {
                    detail: result.detail,
                }
            }
            Err(error) => {
                warn!(unit_id, error = %error, "review.validation.inconclusive");
                GateVerdict::Inconclusive {
                    reason: error.to_string(),
                }
            }
        }
    }
}
