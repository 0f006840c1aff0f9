use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use store::StoreError;
use tracing::{debug, error};

const INTERNAL_MESSAGE: &str = "Internal error, check server logs";

/// JSON error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error category
    pub error: String,
    /// Human-readable error description
    pub message: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// An [`ApiError`] with the status it is served with
#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    body: ApiError,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, body: ApiError) -> Self {
        Self { status, body }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ApiError::new("validation_error", message),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ApiError {
        &self.body
    }
}

impl From<StoreError> for ErrorResponse {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => {
                debug!(%message, "Rejected request");
                Self::validation(message)
            }
            StoreError::NotFound(message) => {
                debug!(%message, "Target not found");
                Self::new(StatusCode::NOT_FOUND, ApiError::new("not_found", message))
            }
            StoreError::PartialFailure { rate_limited, .. } => {
                let category = if rate_limited {
                    "rate_limited"
                } else {
                    "partial_failure"
                };
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new(category, err.to_string()),
                )
            }
            StoreError::Storage(ref e) if e.is_rate_limited() => {
                error!(error = %err, "Bucket is rate limiting");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("rate_limited", "Bucket is rate limiting, try again later"),
                )
            }
            other => {
                error!(error = %other, "Internal error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("internal_error", INTERNAL_MESSAGE),
                )
            }
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ErrorResponse>;
