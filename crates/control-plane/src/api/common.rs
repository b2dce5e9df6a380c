// Common DTOs and error mapping for the public API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hookline_core::WebhookError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Response wrapper for list endpoints.
/// All list endpoints return responses wrapped in a `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    /// Array of items returned by the list operation.
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

/// Error returned by handlers, rendered as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let status = match &err {
            WebhookError::Validation { .. } | WebhookError::Configuration(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::SubscriptionNotFound(_) | WebhookError::DeliveryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            WebhookError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            WebhookError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
            // Storage details stay in the logs
            return Self::new(status, "internal server error");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_core::DeliveryStatus;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                WebhookError::validation("endpoint", "bad"),
                StatusCode::BAD_REQUEST,
            ),
            (WebhookError::config("bad secret"), StatusCode::BAD_REQUEST),
            (
                WebhookError::SubscriptionNotFound(Uuid::now_v7()),
                StatusCode::NOT_FOUND,
            ),
            (
                WebhookError::DeliveryNotFound(Uuid::now_v7()),
                StatusCode::NOT_FOUND,
            ),
            (
                WebhookError::InvalidStateTransition {
                    from: DeliveryStatus::Success,
                    to: DeliveryStatus::Retrying,
                },
                StatusCode::CONFLICT,
            ),
            (
                WebhookError::storage("connection reset"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn test_storage_errors_are_not_leaked() {
        let err = ApiError::from(WebhookError::storage("password authentication failed"));
        assert_eq!(err.message, "internal server error");
    }
}
