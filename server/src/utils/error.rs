use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::utils::response::error as error_response;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Webhook signature error: {0}")]
    WebhookSignature(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Event {event_id} is overbooked: {requested} requested, {available} available")]
    Overbooked {
        event_id: uuid::Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::WebhookSignature(_) => StatusCode::BAD_REQUEST,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Overbooked { .. } => StatusCode::CONFLICT,
            AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::WebhookSignature(_) => "INVALID_SIGNATURE",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::Overbooked { .. } => "OVERBOOKED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::Overbooked {
                event_id,
                requested,
                available,
            } => {
                error!(%event_id, requested, available, "Overbooked request rejected");
            }
            other => {
                error!(error = %other, code = other.code(), "Application error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let (public_message, details) = match &self {
            AppError::DatabaseError(_) => ("A database error occurred".to_string(), None),
            AppError::InternalServerError(_) => ("An internal error occurred".to_string(), None),
            AppError::Overbooked {
                requested,
                available,
                ..
            } => (
                "Not enough places left for this event, the payment has been refunded"
                    .to_string(),
                Some(json!({ "requested": requested, "available": available })),
            ),
            AppError::WebhookSignature(msg)
            | AppError::ValidationError(msg)
            | AppError::Conflict(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::ExternalServiceError(msg) => (msg.clone(), None),
        };

        error_response(code, public_message, details, status)
    }
}
