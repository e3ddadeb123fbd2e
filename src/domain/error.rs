use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    Conflict(String),
    Gateway(String),
    DataIntegrity(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        EngineError::Conflict(message.into())
    }

    pub fn gateway(message: impl Into<String>) -> Self {
        EngineError::Gateway(message.into())
    }

    pub fn data_integrity(message: impl Into<String>) -> Self {
        EngineError::DataIntegrity(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        EngineError::NotFound(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::Gateway(_) => "GATEWAY_UNAVAILABLE",
            EngineError::DataIntegrity(_) => "DATA_INTEGRITY",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Gateway(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::DataIntegrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            EngineError::Validation(m)
            | EngineError::Conflict(m)
            | EngineError::DataIntegrity(m)
            | EngineError::NotFound(m) => m.clone(),
            EngineError::Gateway(m) => {
                format!("{m}; provider temporarily unavailable, retrying")
            }
            EngineError::Internal(e) => e.to_string(),
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorPayload {
                code: self.code().to_string(),
                message: self.message(),
            },
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Internal(e)
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Internal(e.into())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(e: redis::RedisError) -> Self {
        EngineError::Internal(e.into())
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        if matches!(self, EngineError::Internal(_) | EngineError::DataIntegrity(_)) {
            tracing::error!("{}", self);
        }
        (self.status(), Json(self.envelope())).into_response()
    }
}
