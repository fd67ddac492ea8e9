//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core_state::CoreError;
use crate::models::ConnectionStatus;
use crate::progress::ProgressError;
use crate::reconciler::ReconcilerError;
use crate::registry::RegistryError;
use crate::scheduler::SchedulerError;
use crate::storage::StorageError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Not allowed")]
    Forbidden,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("A request for this pair is already open")]
    DuplicateRequest { status: ConnectionStatus },
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Authentication required".to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "You do not have access to this resource".to_string(),
            ),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::DuplicateRequest { status } => (
                StatusCode::CONFLICT,
                "DUPLICATE_REQUEST",
                format!("A request for this pair is already {}", status.as_str()),
            ),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone()),
            ApiError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                "Uploaded file exceeds the size limit".to_string(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<crate::db::DatabaseError> for ApiError {
    fn from(err: crate::db::DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Duplicate { status } => ApiError::DuplicateRequest { status },
            RegistryError::NotFound => ApiError::NotFound("Connection not found".into()),
            RegistryError::Unauthorized => ApiError::Forbidden,
            RegistryError::Validation(msg) => ApiError::BadRequest(msg),
            RegistryError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound => ApiError::NotFound("Task not found".into()),
            SchedulerError::ConnectionNotFound => ApiError::NotFound("Connection not found".into()),
            SchedulerError::Unauthorized => ApiError::Forbidden,
            SchedulerError::Validation(msg) => ApiError::BadRequest(msg),
            SchedulerError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ReconcilerError> for ApiError {
    fn from(err: ReconcilerError) -> Self {
        match err {
            ReconcilerError::ConnectionNotFound => ApiError::NotFound("Connection not found".into()),
            ReconcilerError::Unauthorized => ApiError::Forbidden,
            ReconcilerError::Validation(msg) => ApiError::BadRequest(msg),
            ReconcilerError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ProgressError> for ApiError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::ConnectionNotFound => ApiError::NotFound("Connection not found".into()),
            ProgressError::Unauthorized => ApiError::Forbidden,
            ProgressError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnsupportedType(t) => {
                ApiError::BadRequest(format!("Unsupported file type: {t}"))
            }
            StorageError::TooLarge => ApiError::PayloadTooLarge,
            StorageError::InvalidName => ApiError::BadRequest("Invalid file name".into()),
            StorageError::NotFound => ApiError::NotFound("File not found".into()),
            StorageError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn unauthorized_returns_401() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn duplicate_request_returns_409_with_status() {
        let response = ApiError::DuplicateRequest {
            status: ConnectionStatus::Pending,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "DUPLICATE_REQUEST");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("pending"));
    }

    #[tokio::test]
    async fn forbidden_returns_403() {
        let response = ApiError::Forbidden.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = ApiError::Internal("something broke".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn registry_duplicate_maps_to_conflict() {
        let api_err: ApiError = RegistryError::Duplicate {
            status: ConnectionStatus::Pending,
        }
        .into();
        assert_eq!(api_err.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn scheduler_unauthorized_maps_to_forbidden() {
        let api_err: ApiError = SchedulerError::Unauthorized.into();
        assert_eq!(api_err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn storage_too_large_maps_to_413() {
        let api_err: ApiError = StorageError::TooLarge.into();
        assert_eq!(
            api_err.into_response().status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
