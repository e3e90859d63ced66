//! Gateway error taxonomy
//!
//! Every control-plane failure funnels into [`ApiError`], which owns the
//! status-code mapping and the wire envelope. Stream-plane failures (SSH
//! transport, assistant providers) have their own types and surface as
//! `ssh:status` / `ai:response` frames instead; see the `ssh` and
//! `assistant` modules.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::vault::VaultError;

/// Result alias for handlers and stores.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input. Returned to the caller, never logged as an incident.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    /// Wrong email/password combination; never says which field was wrong.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Over the request budget for the current window.
    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    NameConflict(String),

    /// Decryption or key mismatch. Generic message outward, details logged.
    #[error("Internal server error")]
    Crypto,

    #[error("Internal server error")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NameConflict(_) => StatusCode::CONFLICT,
            Self::Crypto | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        error!("Vault operation failed: {}", e);
        Self::Crypto
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

/// Error envelope: `{success: false, error, retryAfter?}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Database(e) => error!("Database error: {}", e),
            ApiError::Internal(msg) => error!("Internal error: {}", msg),
            ApiError::Unauthorized | ApiError::InvalidCredentials => {
                debug!("Auth rejection: {}", self)
            }
            _ => {}
        }

        let retry_after = match &self {
            ApiError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            retry_after,
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Success envelope: `{success: true, data}`.
#[derive(Debug, Serialize)]
pub struct ApiData<T: Serialize> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiData<T>> {
    Json(ApiData { success: true, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::RateLimited { retry_after_secs: 60 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::NotFound("profile").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::NameConflict("taken".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Crypto.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_crypto_error_is_generic() {
        // Decryption failures must not leak details to the caller
        assert_eq!(ApiError::Crypto.to_string(), "Internal server error");
    }
}
