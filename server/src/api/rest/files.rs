//! File-entry routes: registration, lookup, listing and removal.

use crate::api::AppState;
use crate::db::{chunks, files};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::error::{extract_user, parse_id, ApiError};
use super::types::{FileInfoJson, FileInfoResponse, RegisterFileRequest};

pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/api/files", get(list_files).post(register_file))
        // Registered alongside the parameterized route; the literal segment
        // wins, so "name" never parses as a file ID.
        .route("/api/file/name", get(get_file_by_name))
        .route("/api/file/:file_id", get(get_file).delete(remove_file))
}

#[derive(Serialize)]
struct FileListResponse {
    #[serde(rename = "Files")]
    files: Vec<FileInfoJson>,
}

#[derive(Serialize)]
struct RegisterFileResponse {
    #[serde(rename = "FileInfo")]
    file_info: FileInfoJson,
}

#[derive(Deserialize)]
struct FileNameRequest {
    #[serde(rename = "FileName")]
    file_name: String,
}

#[derive(Serialize)]
struct SuccessResponse {
    #[serde(rename = "Success")]
    success: bool,
}

async fn list_files(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<FileListResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;
    let infos = files::get_all_user_file_infos(&state.db, user.user_id).await?;

    Ok(Json(FileListResponse {
        files: infos.into_iter().map(FileInfoJson::from).collect(),
    }))
}

async fn register_file(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<RegisterFileRequest>,
) -> Result<Json<RegisterFileResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;

    if req.file_name.is_empty() {
        return Err(ApiError::BadRequest("FileName must not be empty".into()));
    }
    if req.chunk_count < 0 {
        return Err(ApiError::BadRequest("ChunkCount must not be negative".into()));
    }

    let info = files::add_file_info(
        &state.db,
        user.user_id,
        &req.file_name,
        req.is_dir,
        req.permissions,
        req.last_mod,
        req.chunk_count,
        &req.file_hash,
    )
    .await?;

    Ok(Json(RegisterFileResponse {
        file_info: info.into(),
    }))
}

async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: axum::http::HeaderMap,
) -> Result<Json<FileInfoResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;
    let file_id = parse_id(&file_id, "file ID")?;

    let info = files::get_file_info(&state.db, user.user_id, file_id).await?;
    let missing = chunks::get_missing_chunk_numbers(&state.db, user.user_id, file_id).await?;

    Ok(Json(FileInfoResponse {
        file_info: info.into(),
        missing_chunks: missing,
    }))
}

async fn get_file_by_name(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<FileNameRequest>,
) -> Result<Json<FileInfoResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;

    let info = files::get_file_info_by_name(&state.db, user.user_id, &req.file_name).await?;
    let missing = chunks::get_missing_chunk_numbers(&state.db, user.user_id, info.file_id).await?;

    Ok(Json(FileInfoResponse {
        file_info: info.into(),
        missing_chunks: missing,
    }))
}

async fn remove_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: axum::http::HeaderMap,
) -> Result<Json<SuccessResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;
    let file_id = parse_id(&file_id, "file ID")?;

    files::remove_file(&state.db, user.user_id, file_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}
