use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::dm::targeting::TargetingError;
use crate::outreach::resume::ResumeError;
use crate::outreach::smtp::SmtpConfigError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SmtpConfigError> for AppError {
    fn from(e: SmtpConfigError) -> Self {
        match e {
            SmtpConfigError::Transport(_) => AppError::Internal(e.into()),
            _ => AppError::Validation(e.to_string()),
        }
    }
}

impl From<ResumeError> for AppError {
    fn from(e: ResumeError) -> Self {
        match e {
            ResumeError::Io(_) => AppError::Internal(e.into()),
            _ => AppError::Validation(e.to_string()),
        }
    }
}

impl From<TargetingError> for AppError {
    fn from(e: TargetingError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        AppError::Validation(format!("Invalid multipart upload: {e}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_provider_is_a_client_error() {
        let err: AppError = SmtpConfigError::UnsupportedProvider("example.org".to_string()).into();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("example.org")));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_resume_io_error_is_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: AppError = ResumeError::Io(io).into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err: AppError = ResumeError::NotPdf.into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
