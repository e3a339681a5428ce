//! Error handling for the REST API.
//!
//! Maps storage-engine and auth failures onto the HTTP statuses of the wire
//! contract, and provides bearer-token extraction for the handlers.

use crate::api::AppState;
use crate::auth::{self, token::AuthUser};
use crate::db::StoreError;
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Login failure.
    Unauthenticated(String),
    /// Missing, malformed or expired bearer token.
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    QuotaExceeded,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::QuotaExceeded => (StatusCode::CONFLICT, "quota exceeded".to_string()),
            ApiError::Internal(msg) => {
                // Log full details server-side, return a generic message.
                tracing::error!(details = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "an internal error occurred".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "Error": message });
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("not found".to_string()),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::QuotaExceeded => ApiError::QuotaExceeded,
            StoreError::ChunkConflict => {
                ApiError::Conflict("chunk already stored with a different hash".to_string())
            }
            StoreError::ChunkOutOfRange => {
                ApiError::BadRequest("chunk number out of range".to_string())
            }
            StoreError::Db(e) => {
                tracing::error!("database error: {}", e);
                ApiError::Internal("database error".to_string())
            }
        }
    }
}

/// Extract and verify the bearer token, yielding the authenticated user.
///
/// Every `/api/*` handler except login goes through here; any failure is a
/// 403 per the wire contract.
pub fn extract_user(
    state: &AppState,
    headers: &axum::http::HeaderMap,
) -> Result<AuthUser, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Forbidden("missing authorization header".into()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Forbidden("invalid authorization format".into()))?;

    auth::token::verify_token(&state.config.jwt_secret, token)
        .map_err(|e| ApiError::Forbidden(e.to_string()))
}

/// Parse a numeric path parameter; non-numeric input is a 400.
pub fn parse_id(raw: &str, what: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("invalid {}", what)))
}
