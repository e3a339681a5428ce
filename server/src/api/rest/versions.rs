//! Version routes: tagging a new current version and listing history.

use crate::api::AppState;
use crate::db::versions;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::error::{extract_user, parse_id, ApiError};
use super::types::{FileInfoJson, FileVersionJson, RegisterFileRequest};

pub fn version_routes() -> Router<AppState> {
    Router::new()
        .route("/api/file/:file_id/version", post(tag_version))
        .route("/api/file/:file_id/versions", get(list_versions))
        .route(
            "/api/file/:file_id/versions/:min_version/:max_version",
            axum::routing::delete(remove_versions),
        )
}

#[derive(Serialize)]
struct TagVersionResponse {
    #[serde(rename = "FileInfo")]
    file_info: FileInfoJson,
    #[serde(rename = "Status")]
    status: bool,
}

#[derive(Serialize)]
struct VersionListResponse {
    #[serde(rename = "Versions")]
    versions: Vec<FileVersionJson>,
}

#[derive(Serialize)]
struct SuccessResponse {
    #[serde(rename = "Success")]
    success: bool,
}

async fn tag_version(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: axum::http::HeaderMap,
    Json(req): Json<RegisterFileRequest>,
) -> Result<Json<TagVersionResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;
    let file_id = parse_id(&file_id, "file ID")?;

    if req.chunk_count < 0 {
        return Err(ApiError::BadRequest("ChunkCount must not be negative".into()));
    }

    let info = versions::tag_new_file_version(
        &state.db,
        user.user_id,
        file_id,
        req.permissions,
        req.last_mod,
        req.chunk_count,
        &req.file_hash,
    )
    .await?;

    Ok(Json(TagVersionResponse {
        file_info: info.into(),
        status: true,
    }))
}

async fn remove_versions(
    State(state): State<AppState>,
    Path((file_id, min_version, max_version)): Path<(String, String, String)>,
    headers: axum::http::HeaderMap,
) -> Result<Json<SuccessResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;
    let file_id = parse_id(&file_id, "file ID")?;
    let min_version = parse_id(&min_version, "min version")?;
    let max_version = parse_id(&max_version, "max version")?;

    if min_version < 1 || max_version < min_version {
        return Err(ApiError::BadRequest("invalid version range".into()));
    }

    versions::remove_file_versions(&state.db, user.user_id, file_id, min_version, max_version)
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}

async fn list_versions(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: axum::http::HeaderMap,
) -> Result<Json<VersionListResponse>, ApiError> {
    let user = extract_user(&state, &headers)?;
    let file_id = parse_id(&file_id, "file ID")?;

    let versions = versions::get_file_versions(&state.db, user.user_id, file_id).await?;

    Ok(Json(VersionListResponse {
        versions: versions.into_iter().map(FileVersionJson::from).collect(),
    }))
}
