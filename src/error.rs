//! Error types for the investment insight orchestrator
//!
//! Only [`OrchestrationError`] ever reaches a caller of the engine. The
//! per-layer enums below are absorbed by the orchestrator according to the
//! propagation policy: tool errors become degraded-context markers, agent
//! and validation errors drive the retry/fallback path, and session errors
//! are the single hard failure.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Session unavailable: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

// =============================
// Tool errors
// =============================

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolErrorKind {
    NotFound,
    ProviderUnavailable,
    InvalidArgs,
}

/// Outcome of a failed data tool invocation. Never converted into success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

impl ToolError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            ToolError::NotFound(_) => ToolErrorKind::NotFound,
            ToolError::ProviderUnavailable(_) => ToolErrorKind::ProviderUnavailable,
            ToolError::InvalidArgs(_) => ToolErrorKind::InvalidArgs,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ToolError::NotFound(d) | ToolError::ProviderUnavailable(d) | ToolError::InvalidArgs(d) => d,
        }
    }
}

// =============================
// Agent errors
// =============================

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AgentErrorKind {
    Timeout,
    ProviderError,
    MalformedOutput,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent timed out: {0}")]
    Timeout(String),

    #[error("model provider error: {0}")]
    ProviderError(String),

    #[error("malformed agent output: {0}")]
    MalformedOutput(String),
}

impl AgentError {
    pub fn kind(&self) -> AgentErrorKind {
        match self {
            AgentError::Timeout(_) => AgentErrorKind::Timeout,
            AgentError::ProviderError(_) => AgentErrorKind::ProviderError,
            AgentError::MalformedOutput(_) => AgentErrorKind::MalformedOutput,
        }
    }
}

// =============================
// Validation / session errors
// =============================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("response does not match the expected shape: {0}")]
    SchemaMismatch(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_kinds_serialize_kebab_case() {
        let kind = ToolError::ProviderUnavailable("timeout".into()).kind();
        assert_eq!(
            serde_json::to_string(&kind).unwrap(),
            "\"provider-unavailable\""
        );
        assert_eq!(ToolError::NotFound("x".into()).detail(), "x");
    }

    #[test]
    fn test_session_error_is_hard_failure() {
        let err: OrchestrationError = SessionError::StoreUnavailable("db down".into()).into();
        assert!(matches!(err, OrchestrationError::Session(_)));
        assert!(err.to_string().contains("db down"));
    }
}
