//! Error types for lnp-ingest
//!
//! Hard-gate failures carry the message shown verbatim to the uploader.
//! Only [`ApiError::TransientStorageFailure`] and lock contention are
//! considered retryable by the job queue.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Actor lacks the capability (403)
    #[error("{0}")]
    Forbidden(String),

    /// Submission window is not open (423)
    #[error("{0}")]
    WindowClosed(String),

    /// Uniqueness violation, e.g. a second note for one slot (409)
    #[error("{0}")]
    Conflict(String),

    /// Upload over the size cap (413)
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Content signature not on the allow-list (415)
    #[error("{0}")]
    UnsupportedMediaType(String),

    /// Virus detected, or scanner unavailable (422)
    #[error("{0}")]
    SecurityRejected(String),

    /// Signed URL MAC mismatch or malformed capability (401)
    #[error("{0}")]
    InvalidSignature(String),

    /// Signed URL past its expiry (410)
    #[error("{0}")]
    Expired(String),

    /// Rate limit exhausted (429)
    #[error("{message}")]
    RateLimited { message: String, retry_after_secs: i64 },

    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Both storage backends failed or timed out (503)
    #[error("{0}")]
    TransientStorageFailure(String),

    /// Illegal review transition (412)
    #[error("{0}")]
    PreconditionFailed(String),

    /// Invalid request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("Common error: {0}")]
    Common(lnp_common::Error),
}

impl ApiError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::WindowClosed(_) => "WINDOW_CLOSED",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::SecurityRejected(_) => "SECURITY_REJECTED",
            ApiError::InvalidSignature(_) => "INVALID_SIGNATURE",
            ApiError::Expired(_) => "EXPIRED",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::TransientStorageFailure(_) => "TRANSIENT_STORAGE_FAILURE",
            ApiError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) | ApiError::Other(_) => "INTERNAL_ERROR",
            ApiError::Io(_) => "IO_ERROR",
            ApiError::Common(lnp_common::Error::NotFound(_)) => "NOT_FOUND",
            ApiError::Common(lnp_common::Error::InvalidInput(_)) => "BAD_REQUEST",
            ApiError::Common(_) => "COMMON_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::WindowClosed(_) => StatusCode::LOCKED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::SecurityRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            ApiError::Expired(_) => StatusCode::GONE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TransientStorageFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Common(lnp_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Common(lnp_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Other(_) | ApiError::Common(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the job queue should retry the failed operation
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::TransientStorageFailure(_) => true,
            ApiError::Common(err) => err.is_lock_contention(),
            _ => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(code, %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        match self {
            ApiError::RateLimited { retry_after_secs, .. } => (
                status,
                [(axum::http::header::RETRY_AFTER, retry_after_secs.max(0).to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

impl From<lnp_common::Error> for ApiError {
    fn from(err: lnp_common::Error) -> Self {
        // UNIQUE indexes back the one-per-slot invariants
        if err.is_unique_violation() {
            ApiError::Conflict("record already exists".to_string())
        } else {
            ApiError::Common(err)
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        lnp_common::Error::Database(err).into()
    }
}

/// Result type for API handlers and pipeline services
pub type ApiResult<T> = Result<T, ApiError>;
