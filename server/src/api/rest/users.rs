//! Per-user routes: stats and the passphrase verifier.

use crate::api::AppState;
use crate::db::users;
use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::error::{extract_user, ApiError};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/user/stats", get(get_stats))
        .route("/api/user/cryptohash", put(put_crypto_hash))
}

#[derive(Serialize)]
struct StatsJson {
    #[serde(rename = "Quota")]
    quota: i64,
    #[serde(rename = "Allocated")]
    allocated: i64,
    #[serde(rename = "Revision")]
    revision: i64,
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(rename = "Stats")]
    stats: StatsJson,
}

#[derive(Deserialize)]
struct CryptoHashRequest {
    #[serde(rename = "CryptoHash")]
    crypto_hash: String,
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(rename = "Status")]
    status: bool,
}

async fn get_stats(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<StatsResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;
    let stats = users::get_user_stats(&state.db, user.user_id).await?;

    Ok(Json(StatsResponse {
        stats: StatsJson {
            quota: stats.quota,
            allocated: stats.allocated,
            revision: stats.revision,
        },
    }))
}

async fn put_crypto_hash(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<CryptoHashRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;

    let bytes = BASE64
        .decode(req.crypto_hash.as_bytes())
        .map_err(|_| ApiError::BadRequest("CryptoHash is not valid base64".into()))?;

    users::update_user_crypto_hash(&state.db, user.user_id, &bytes).await?;
    Ok(Json(StatusResponse { status: true }))
}
