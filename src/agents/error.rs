//! Error types for the agent runtime
//!
//! `AgentError` is the taxonomy every request path resolves to. It renders
//! itself as an HTTP response carrying only a generic message; the detail a
//! variant holds is written to the local log and never sent to the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that can occur while serving an agent request
#[derive(Debug, Error)]
pub enum AgentError {
    /// Malformed input (bad JSON, missing field, oversized metadata)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Message body exceeds the configured ceiling
    #[error("Message too large: {len} bytes exceeds limit of {max}")]
    MessageTooLarge { len: usize, max: usize },

    /// Session id is not a well-formed UUID
    #[error("Invalid session id: {0}")]
    InvalidId(String),

    /// Session does not exist (never created, closed or evicted)
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Generic missing resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Agent name is not part of the static roster
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Delegation depth ceiling reached
    #[error("Delegation depth {depth} reached the limit of {max_depth} (origin: {origin})")]
    DelegationLoopExceeded {
        depth: u32,
        max_depth: u32,
        origin: String,
        chain: Vec<String>,
    },

    /// Session cap reached and no idle session could be evicted
    #[error("Session capacity of {0} exhausted")]
    CapacityExceeded(usize),

    /// Inference backend unreachable or timed out
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Inference backend answered with something unusable
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Direct delegation to a sibling failed
    #[error("Delegation to '{target}' failed: {reason}")]
    DelegationFailed { target: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Stable machine-readable kind used in response bodies and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation_error",
            AgentError::MessageTooLarge { .. } => "message_too_large",
            AgentError::InvalidId(_) => "invalid_id",
            AgentError::SessionNotFound(_) => "session_not_found",
            AgentError::NotFound(_) => "not_found",
            AgentError::UnknownAgent(_) => "unknown_agent",
            AgentError::DelegationLoopExceeded { .. } => "delegation_loop_exceeded",
            AgentError::CapacityExceeded(_) => "capacity_exceeded",
            AgentError::BackendUnavailable(_) => "backend_unavailable",
            AgentError::BackendError(_) => "backend_error",
            AgentError::DelegationFailed { .. } => "delegation_failed",
            AgentError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::Validation(_) | AgentError::InvalidId(_) => StatusCode::BAD_REQUEST,
            AgentError::MessageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AgentError::SessionNotFound(_)
            | AgentError::NotFound(_)
            | AgentError::UnknownAgent(_) => StatusCode::NOT_FOUND,
            AgentError::DelegationLoopExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AgentError::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AgentError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::BackendError(_) | AgentError::DelegationFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to an external caller
    pub fn public_message(&self) -> String {
        match self {
            AgentError::Validation(_) => "Invalid request".to_string(),
            AgentError::MessageTooLarge { max, .. } => {
                format!("Message too large (limit {max} bytes)")
            }
            AgentError::InvalidId(_) => "Invalid session ID".to_string(),
            AgentError::SessionNotFound(_) => "Session not found".to_string(),
            AgentError::NotFound(_) => "Not found".to_string(),
            AgentError::UnknownAgent(name) => format!("Agent '{name}' is unknown"),
            AgentError::DelegationLoopExceeded { max_depth, .. } => {
                format!("Delegation refused: maximum depth of {max_depth} reached")
            }
            AgentError::CapacityExceeded(_) => "Too many sessions".to_string(),
            AgentError::BackendUnavailable(_) => "Model backend unavailable".to_string(),
            AgentError::BackendError(_) => "Internal error while calling the model".to_string(),
            AgentError::DelegationFailed { .. } => "Communication error with the agent".to_string(),
            AgentError::Internal(_) => "Internal error".to_string(),
        }
    }

    /// Whether this is a caller mistake rather than a failure on our side
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_client_error() {
            tracing::debug!(kind = self.kind(), "request rejected: {}", self);
        } else {
            tracing::error!(kind = self.kind(), "request failed: {}", self);
        }

        let mut body = json!({
            "error": self.kind(),
            "message": self.public_message(),
        });

        if let AgentError::DelegationLoopExceeded {
            depth,
            max_depth,
            origin,
            chain,
        } = &self
        {
            body["depth"] = json!(depth);
            body["max_depth"] = json!(max_depth);
            body["origin"] = json!(origin);
            body["chain"] = json!(chain);
        }
        if let AgentError::UnknownAgent(name) = &self {
            body["agent"] = json!(name);
        }

        (status, Json(body)).into_response()
    }
}

/// Errors specific to the inference backend
#[derive(Debug, Error)]
pub enum LlmError {
    /// Non-success HTTP status from the backend
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Timeout
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::Network(format!("Connection error: {}", err))
        } else if err.is_decode() {
            LlmError::Parse(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Network(_) | LlmError::Timeout | LlmError::Streaming(_) => {
                AgentError::BackendUnavailable(err.to_string())
            }
            LlmError::Api { .. } | LlmError::Parse(_) | LlmError::InvalidRequest(_) => {
                AgentError::BackendError(err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Validation(err.to_string())
    }
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AgentError::InvalidId("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AgentError::CapacityExceeded(100).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AgentError::BackendUnavailable("refused".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AgentError::MessageTooLarge { len: 10, max: 5 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_backend_detail_is_not_public() {
        let err: AgentError = LlmError::Api {
            status: 500,
            message: "model 'secret-model' crashed at /srv/llm".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "backend_error");
        assert!(!err.public_message().contains("secret-model"));
        assert!(err.to_string().contains("secret-model"));
    }

    #[test]
    fn test_llm_error_classification() {
        assert!(matches!(
            AgentError::from(LlmError::Timeout),
            AgentError::BackendUnavailable(_)
        ));
        assert!(matches!(
            AgentError::from(LlmError::Parse("bad".into())),
            AgentError::BackendError(_)
        ));
    }

    #[tokio::test]
    async fn test_loop_exceeded_body_names_chain() {
        let response = AgentError::DelegationLoopExceeded {
            depth: 3,
            max_depth: 3,
            origin: "orchestrator".into(),
            chain: vec!["orchestrator".into(), "code".into(), "security".into()],
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "delegation_loop_exceeded");
        assert_eq!(body["origin"], "orchestrator");
        assert_eq!(body["chain"][2], "security");
    }
}
