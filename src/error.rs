/*!
 * Error Handling
 * One error type for every handler, rendered as `{ "message": ... }`
 */
use std::error::Error as _;

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::StoreError;

lazy_static::lazy_static! {
    /// Internal error details are only exposed outside production.
    static ref EXPOSE_DETAILS: bool =
        std::env::var("ENVIRONMENT").map(|e| e != "production").unwrap_or(true);
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate email or review. Clients expect 400 here, not 409.
    #[error("{0}")]
    Duplicate(String),

    /// Unique-key clash on a resource (course code).
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error("Database error")]
    Store(#[source] StoreError),
}

pub type AppResult<T> = Result<T, AppError>;

/// Error body shared by every route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Duplicate(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AppError::Duplicate("User already exists".to_string()),
            StoreError::DuplicateCode(code) => {
                AppError::Conflict(format!("Course code already exists: {}", code))
            }
            StoreError::AlreadyReviewed => {
                AppError::Duplicate("Course already reviewed".to_string())
            }
            other => AppError::Store(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!("Path rejected: {}", rejection.body_text());
        AppError::Validation("Invalid id".to_string())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        tracing::warn!("Multipart error: {}", err);
        AppError::Validation("Invalid multipart data".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let stack = if status.is_server_error() {
            let mut chain = vec![self.to_string()];
            let mut source = self.source();
            while let Some(err) = source {
                chain.push(err.to_string());
                source = err.source();
            }
            let detail = chain.join(": ");
            tracing::error!(status = %status, error = %detail, "request failed");
            EXPOSE_DETAILS.then_some(detail)
        } else {
            None
        };

        let body = ErrorResponse {
            message: self.to_string(),
            stack,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: AppError) -> (StatusCode, ErrorResponse) {
        let res = err.into_response();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_not_found_renders_message() {
        let (status, body) = render(AppError::NotFound("Course not found".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.message, "Course not found");
        assert!(body.stack.is_none());
    }

    #[tokio::test]
    async fn test_store_error_is_500_with_detail_outside_production() {
        let (status, body) = render(AppError::Store(StoreError::Corrupt(
            "invalid level: Expert".to_string(),
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "Database error");
        assert!(body.stack.unwrap().contains("invalid level"));
    }

    #[test]
    fn test_store_conflicts_map_to_client_errors() {
        assert_eq!(
            AppError::from(StoreError::DuplicateEmail).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StoreError::AlreadyReviewed).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StoreError::DuplicateCode("X1".to_string())).status(),
            StatusCode::CONFLICT
        );
    }
}
