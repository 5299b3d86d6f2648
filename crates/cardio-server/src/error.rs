//! Application error types and Axum response conversion.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cardio_core::CardioError;
use serde::Serialize;
use tracing::error;

/// Application-level errors with HTTP status code mapping.
///
/// Only `NotFound`, `Unprocessable`, `ServiceUnavailable` and `Rejected`
/// carry caller-facing messages; internal failures are logged and answered
/// with a generic body.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unprocessable(String),
    ServiceUnavailable(String),
    /// Request refused before its body was read, with the extractor's status.
    Rejected(StatusCode, String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Rejected(status, msg) => (status, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<CardioError> for AppError {
    fn from(err: CardioError) -> Self {
        match err {
            CardioError::Validation(messages) => AppError::Unprocessable(messages.join("; ")),
            CardioError::NotFound(msg) => AppError::NotFound(msg),
            CardioError::AdvisoryDisabled => {
                AppError::ServiceUnavailable("advisory generation is not configured".into())
            }
            other => {
                error!("Request failed: {}", other);
                AppError::Internal("internal server error".into())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
                AppError::Unprocessable(rejection.body_text())
            }
            other => AppError::Rejected(other.status(), other.body_text()),
        }
    }
}
