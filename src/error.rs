use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

/// Convenience type alias for Results with OrchestratorError
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Error kinds surfaced at the HTTP edge, plus the ambient wrapping
/// variants every I/O boundary needs. The status code each variant
/// maps to at the API edge lives in `status_code()` below.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("no agents registered")]
    NoAgents,

    #[error("no suitable agent for task")]
    NoneSuitable,

    #[error("timed out waiting for an available agent")]
    ReservationTimeout,

    #[error("task timed out: {message}")]
    TimedOut { message: String },

    #[error("agent crashed: {message}")]
    AgentCrashed { message: String },

    #[error("agent protocol error: {message}")]
    ProtocolError { message: String },

    #[error("invalid request: {message}")]
    BadInput { message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("adapter failure: {message}")]
    AdapterFailure { message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrchestratorError::NoAgents
            | OrchestratorError::NoneSuitable
            | OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::ReservationTimeout => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::TimedOut { .. } => StatusCode::REQUEST_TIMEOUT,
            OrchestratorError::BadInput { .. } => StatusCode::BAD_REQUEST,
            OrchestratorError::Unauthorized => StatusCode::UNAUTHORIZED,
            OrchestratorError::AgentCrashed { .. }
            | OrchestratorError::ProtocolError { .. }
            | OrchestratorError::AdapterFailure { .. }
            | OrchestratorError::Http(_)
            | OrchestratorError::Serialization(_)
            | OrchestratorError::Config(_)
            | OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Kind name recorded on the ErrorRecord; never the only thing
    /// shown to a client since the Display message is also returned,
    /// but kept distinct for dashboard filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::NoAgents => "NoAgents",
            OrchestratorError::NoneSuitable => "NoneSuitable",
            OrchestratorError::ReservationTimeout => "ReservationTimeout",
            OrchestratorError::TimedOut { .. } => "TimedOut",
            OrchestratorError::AgentCrashed { .. } => "AgentCrashed",
            OrchestratorError::ProtocolError { .. } => "ProtocolError",
            OrchestratorError::BadInput { .. } => "BadInput",
            OrchestratorError::Unauthorized => "Unauthorized",
            OrchestratorError::AdapterFailure { .. } => "AdapterFailure",
            OrchestratorError::NotFound(_) => "NotFound",
            OrchestratorError::Http(_) => "Http",
            OrchestratorError::Serialization(_) => "Serialization",
            OrchestratorError::Config(_) => "Config",
            OrchestratorError::Internal(_) => "Internal",
        }
    }
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.kind(), "message": self.to_string() }));
        (status, body).into_response()
    }
}
