//! Chunk routes.
//!
//! Chunk payloads are raw octet-stream bodies: the ciphertext the client
//! sealed, stored and served without interpretation. The plaintext chunk
//! hash travels in the URL and is kept as metadata only.

use crate::api::AppState;
use crate::db::chunks;
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use super::error::{extract_user, parse_id, ApiError};

pub fn chunk_routes() -> Router<AppState> {
    Router::new()
        .route("/api/chunk/:file_id/:version_id", get(list_chunks))
        .route(
            "/api/chunk/:file_id/:version_id/:chunk_number",
            get(get_chunk),
        )
        .route(
            "/api/chunk/:file_id/:version_id/:chunk_number/:chunk_hash",
            axum::routing::put(put_chunk),
        )
}

#[derive(Serialize)]
struct ChunkInfoJson {
    #[serde(rename = "ChunkNumber")]
    chunk_number: i64,
    #[serde(rename = "ChunkHash")]
    chunk_hash: String,
}

#[derive(Serialize)]
struct ChunkListResponse {
    #[serde(rename = "Chunks")]
    chunks: Vec<ChunkInfoJson>,
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(rename = "Status")]
    status: bool,
}

async fn list_chunks(
    State(state): State<AppState>,
    Path((file_id, version_id)): Path<(String, String)>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ChunkListResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;
    let file_id = parse_id(&file_id, "file ID")?;
    let version_id = parse_id(&version_id, "version ID")?;

    let infos = chunks::get_file_chunk_infos(&state.db, user.user_id, file_id, version_id).await?;

    Ok(Json(ChunkListResponse {
        chunks: infos
            .into_iter()
            .map(|c| ChunkInfoJson {
                chunk_number: c.chunk_number,
                chunk_hash: c.chunk_hash,
            })
            .collect(),
    }))
}

async fn get_chunk(
    State(state): State<AppState>,
    Path((file_id, version_id, chunk_number)): Path<(String, String, String)>,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_user(&state, &headers)?;
    let file_id = parse_id(&file_id, "file ID")?;
    let version_id = parse_id(&version_id, "version ID")?;
    let chunk_number = parse_id(&chunk_number, "chunk number")?;

    let record =
        chunks::get_file_chunk(&state.db, user.user_id, file_id, version_id, chunk_number).await?;

    Ok((
        [(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/octet-stream"),
        )],
        record.chunk,
    ))
}

async fn put_chunk(
    State(state): State<AppState>,
    Path((file_id, version_id, chunk_number, chunk_hash)): Path<(String, String, String, String)>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;
    let file_id = parse_id(&file_id, "file ID")?;
    let version_id = parse_id(&version_id, "version ID")?;
    let chunk_number = parse_id(&chunk_number, "chunk number")?;

    if chunk_hash.is_empty() {
        return Err(ApiError::BadRequest("chunk hash must not be empty".into()));
    }
    if body.len() as i64 > state.config.max_chunk_bytes() {
        return Err(ApiError::BadRequest(format!(
            "chunk body exceeds {} bytes",
            state.config.max_chunk_bytes()
        )));
    }

    chunks::add_file_chunk(
        &state.db,
        user.user_id,
        file_id,
        version_id,
        chunk_number,
        &chunk_hash,
        &body,
    )
    .await?;

    tracing::trace!(
        file_id,
        version_id,
        chunk_number,
        bytes = body.len(),
        "chunk stored"
    );

    Ok(Json(StatusResponse { status: true }))
}
