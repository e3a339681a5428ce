//! Login route.
//!
//! Issues a bearer token on success along with the stored passphrase
//! verifier and the server capabilities the client must honor.

use crate::api::AppState;
use crate::auth;
use crate::db::users;
use axum::{extract::State, routing::post, Form, Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::error::ApiError;

pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/api/users/login", post(login))
}

#[derive(Deserialize)]
struct LoginForm {
    user: String,
    password: String,
}

#[derive(Serialize)]
struct ServerCapabilities {
    #[serde(rename = "ChunkSize")]
    chunk_size: i64,
}

#[derive(Serialize)]
struct LoginResponse {
    #[serde(rename = "Token")]
    token: String,
    #[serde(rename = "CryptoHash")]
    crypto_hash: String,
    #[serde(rename = "Capabilities")]
    capabilities: ServerCapabilities,
}

async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = match users::get_user(&state.db, &form.user).await {
        Ok(u) => u,
        Err(_) => {
            tracing::warn!(user = %form.user, "login attempt for unknown user");
            return Err(ApiError::Unauthenticated("invalid credentials".into()));
        }
    };

    let ok = auth::verify_login_password(&form.password, &user.salt, &user.salted_hash)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !ok {
        tracing::warn!(user = %form.user, "login failed");
        return Err(ApiError::Unauthenticated("invalid credentials".into()));
    }

    let token = auth::token::create_token(&state.config.jwt_secret, user.user_id, &user.name)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(user_id = user.user_id, "login successful");

    Ok(Json(LoginResponse {
        token,
        crypto_hash: BASE64.encode(&user.crypto_hash),
        capabilities: ServerCapabilities {
            chunk_size: state.config.chunk_size,
        },
    }))
}
