use std::fmt;

use thiserror::Error;

use crate::decision::DecisionError;

/// A failed backend call, decoded once at the transport boundary.
///
/// `status` is the HTTP status when the server answered; `transient` is an
/// explicit override that takes precedence over any classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    pub transient: Option<bool>,
}

impl ApiError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
            transient: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            transient: None,
        }
    }

    /// A response that arrived but could not be understood. Never retried.
    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some("DECODE_FAILED".to_string()),
            message: message.into(),
            transient: Some(false),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_transient(mut self, transient: bool) -> Self {
        self.transient = Some(transient);
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.code.as_deref()) {
            (Some(status), Some(code)) => write!(f, "HTTP {status} {code}: {}", self.message),
            (Some(status), None) => write!(f, "HTTP {status}: {}", self.message),
            (None, _) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// Why a commit attempt ended without an applied or conflicting result.
#[derive(Debug, Clone, Error)]
pub enum CommitFailure {
    #[error("commit rejected: {0}")]
    Terminal(ApiError),
    #[error("commit failed, the server may accept a retry: {0}")]
    Transient(ApiError),
    #[error("{message}")]
    Timeout { message: String },
    #[error(transparent)]
    InvalidTransition(#[from] DecisionError),
}

impl CommitFailure {
    pub fn code(&self) -> &'static str {
        match self {
            CommitFailure::Terminal(_) => "terminal",
            CommitFailure::Transient(_) => "transient",
            CommitFailure::Timeout { .. } => "timeout",
            CommitFailure::InvalidTransition(_) => "invalid_transition",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status_and_code() {
        let err = ApiError::http(422, "content too long").with_code("UNIT_INVALID");
        assert_eq!(err.to_string(), "HTTP 422 UNIT_INVALID: content too long");
        assert_eq!(
            ApiError::network("connection refused").to_string(),
            "connection refused"
        );
    }

    #[test]
    fn decode_errors_are_never_transient() {
        assert_eq!(ApiError::decode("bad json").transient, Some(false));
    }
}
