//! Wire shapes shared across the REST handlers.
//!
//! Field names follow the wire contract exactly; the client mirrors these
//! types on its side.

use crate::db;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct FileVersionJson {
    #[serde(rename = "VersionID")]
    pub version_id: i64,
    #[serde(rename = "VersionNumber")]
    pub version_number: i64,
    #[serde(rename = "Permissions")]
    pub permissions: u32,
    #[serde(rename = "LastMod")]
    pub last_mod: i64,
    #[serde(rename = "ChunkCount")]
    pub chunk_count: i64,
    #[serde(rename = "FileHash")]
    pub file_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileInfoJson {
    #[serde(rename = "FileID")]
    pub file_id: i64,
    #[serde(rename = "UserID")]
    pub user_id: i64,
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "IsDir")]
    pub is_dir: bool,
    #[serde(rename = "CurrentVersion")]
    pub current_version: FileVersionJson,
}

impl From<db::FileInfo> for FileInfoJson {
    fn from(info: db::FileInfo) -> Self {
        FileInfoJson {
            file_id: info.file_id,
            user_id: info.user_id,
            file_name: info.file_name,
            is_dir: info.is_dir,
            current_version: FileVersionJson {
                version_id: info.version_id,
                version_number: info.version_number,
                permissions: info.permissions,
                last_mod: info.last_mod,
                chunk_count: info.chunk_count,
                file_hash: info.file_hash,
            },
        }
    }
}

impl From<db::FileVersion> for FileVersionJson {
    fn from(v: db::FileVersion) -> Self {
        FileVersionJson {
            version_id: v.version_id,
            version_number: v.version_number,
            permissions: v.permissions,
            last_mod: v.last_mod,
            chunk_count: v.chunk_count,
            file_hash: v.file_hash,
        }
    }
}

/// Body of POST /api/files and POST /api/file/{id}/version (FileName and
/// IsDir are ignored by the latter).
#[derive(Debug, Deserialize)]
pub struct RegisterFileRequest {
    #[serde(rename = "FileName", default)]
    pub file_name: String,
    #[serde(rename = "IsDir", default)]
    pub is_dir: bool,
    #[serde(rename = "Permissions")]
    pub permissions: u32,
    #[serde(rename = "LastMod")]
    pub last_mod: i64,
    #[serde(rename = "ChunkCount")]
    pub chunk_count: i64,
    #[serde(rename = "FileHash", default)]
    pub file_hash: String,
}

#[derive(Debug, Serialize)]
pub struct FileInfoResponse {
    #[serde(rename = "FileInfo")]
    pub file_info: FileInfoJson,
    #[serde(rename = "MissingChunks")]
    pub missing_chunks: Vec<i64>,
}
