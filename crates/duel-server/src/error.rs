use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced by the duel coordinator.
#[derive(Error, Debug)]
pub enum DuelError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),
}

pub type DuelResult<T> = Result<T, DuelError>;

impl DuelError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DuelError::NotFound(_) => StatusCode::NOT_FOUND,
            DuelError::InvalidState(_) => StatusCode::CONFLICT,
            DuelError::Forbidden(_) => StatusCode::FORBIDDEN,
            DuelError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DuelError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let DuelError::Store(e) = &self {
            tracing::error!(error = %e, "storage failure");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
