//! Typed REST client.
//!
//! One method per endpoint with concrete request/response types; these
//! mirror the server's wire shapes field for field.

use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    token: Option<String>,
}

// --- Auth types ---

#[derive(Debug, Deserialize)]
pub struct ServerCapabilities {
    #[serde(rename = "ChunkSize")]
    pub chunk_size: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "Token")]
    pub token: String,
    /// Base64 of the stored passphrase verifier; empty on first login.
    #[serde(rename = "CryptoHash")]
    pub crypto_hash: String,
    #[serde(rename = "Capabilities")]
    pub capabilities: ServerCapabilities,
}

// --- User types ---

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UserStats {
    #[serde(rename = "Quota")]
    pub quota: i64,
    #[serde(rename = "Allocated")]
    pub allocated: i64,
    #[serde(rename = "Revision")]
    pub revision: i64,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(rename = "Stats")]
    stats: UserStats,
}

#[derive(Serialize)]
struct CryptoHashRequest {
    #[serde(rename = "CryptoHash")]
    crypto_hash: String,
}

// --- File types ---

#[derive(Debug, Clone, Deserialize)]
pub struct FileVersionInfo {
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

#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    #[serde(rename = "FileID")]
    pub file_id: i64,
    #[serde(rename = "UserID")]
    pub user_id: i64,
    /// Encrypted name string as stored on the server.
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "IsDir")]
    pub is_dir: bool,
    #[serde(rename = "CurrentVersion")]
    pub current_version: FileVersionInfo,
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(rename = "Files")]
    files: Vec<FileInfo>,
}

#[derive(Serialize)]
struct RegisterFileRequest<'a> {
    #[serde(rename = "FileName")]
    file_name: &'a str,
    #[serde(rename = "IsDir")]
    is_dir: bool,
    #[serde(rename = "Permissions")]
    permissions: u32,
    #[serde(rename = "LastMod")]
    last_mod: i64,
    #[serde(rename = "ChunkCount")]
    chunk_count: i64,
    #[serde(rename = "FileHash")]
    file_hash: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterFileResponse {
    #[serde(rename = "FileInfo")]
    file_info: FileInfo,
}

#[derive(Debug, Deserialize)]
pub struct FileInfoResponse {
    #[serde(rename = "FileInfo")]
    pub file_info: FileInfo,
    #[serde(rename = "MissingChunks")]
    pub missing_chunks: Vec<i64>,
}

#[derive(Serialize)]
struct FileNameRequest<'a> {
    #[serde(rename = "FileName")]
    file_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct VersionListResponse {
    #[serde(rename = "Versions")]
    versions: Vec<FileVersionInfo>,
}

#[derive(Debug, Deserialize)]
struct TagVersionResponse {
    #[serde(rename = "FileInfo")]
    file_info: FileInfo,
}

// --- Chunk types ---

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkInfo {
    #[serde(rename = "ChunkNumber")]
    pub chunk_number: i64,
    #[serde(rename = "ChunkHash")]
    pub chunk_hash: String,
}

#[derive(Debug, Deserialize)]
struct ChunkListResponse {
    #[serde(rename = "Chunks")]
    chunks: Vec<ChunkInfo>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            token: None,
        }
    }

    fn bearer(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Check response status; on error, read the body for the detail message.
    async fn ensure_ok(resp: reqwest::Response) -> ClientResult<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            Err(ClientError::Api { status, message })
        }
    }

    pub async fn login(&mut self, user: &str, password: &str) -> ClientResult<LoginResponse> {
        let resp = self
            .client
            .post(format!("{}/api/users/login", self.base_url))
            .form(&[("user", user), ("password", password)])
            .send()
            .await?;
        let login: LoginResponse = Self::ensure_ok(resp).await?.json().await?;
        self.token = Some(login.token.clone());
        Ok(login)
    }

    pub async fn get_user_stats(&self) -> ClientResult<UserStats> {
        let resp = self
            .bearer(self.client.get(format!("{}/api/user/stats", self.base_url)))
            .send()
            .await?;
        let stats: StatsResponse = Self::ensure_ok(resp).await?.json().await?;
        Ok(stats.stats)
    }

    pub async fn set_crypto_hash(&self, crypto_hash_b64: &str) -> ClientResult<()> {
        let resp = self
            .bearer(
                self.client
                    .put(format!("{}/api/user/cryptohash", self.base_url)),
            )
            .json(&CryptoHashRequest {
                crypto_hash: crypto_hash_b64.to_string(),
            })
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    pub async fn get_all_files(&self) -> ClientResult<Vec<FileInfo>> {
        let resp = self
            .bearer(self.client.get(format!("{}/api/files", self.base_url)))
            .send()
            .await?;
        let list: FileListResponse = Self::ensure_ok(resp).await?.json().await?;
        Ok(list.files)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn register_file(
        &self,
        file_name: &str,
        is_dir: bool,
        permissions: u32,
        last_mod: i64,
        chunk_count: i64,
        file_hash: &str,
    ) -> ClientResult<FileInfo> {
        let resp = self
            .bearer(self.client.post(format!("{}/api/files", self.base_url)))
            .json(&RegisterFileRequest {
                file_name,
                is_dir,
                permissions,
                last_mod,
                chunk_count,
                file_hash,
            })
            .send()
            .await?;
        let created: RegisterFileResponse = Self::ensure_ok(resp).await?.json().await?;
        Ok(created.file_info)
    }

    /// Look up a file by its encrypted name; None when the server has no
    /// such entry.
    pub async fn get_file_by_name(
        &self,
        file_name: &str,
    ) -> ClientResult<Option<FileInfoResponse>> {
        let resp = self
            .bearer(self.client.get(format!("{}/api/file/name", self.base_url)))
            .json(&FileNameRequest { file_name })
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::ensure_ok(resp).await?.json().await?))
    }

    pub async fn remove_file(&self, file_id: i64) -> ClientResult<()> {
        let resp = self
            .bearer(
                self.client
                    .delete(format!("{}/api/file/{}", self.base_url, file_id)),
            )
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    pub async fn tag_new_version(
        &self,
        file_id: i64,
        permissions: u32,
        last_mod: i64,
        chunk_count: i64,
        file_hash: &str,
    ) -> ClientResult<FileInfo> {
        let resp = self
            .bearer(
                self.client
                    .post(format!("{}/api/file/{}/version", self.base_url, file_id)),
            )
            .json(&RegisterFileRequest {
                file_name: "",
                is_dir: false,
                permissions,
                last_mod,
                chunk_count,
                file_hash,
            })
            .send()
            .await?;
        let tagged: TagVersionResponse = Self::ensure_ok(resp).await?.json().await?;
        Ok(tagged.file_info)
    }

    pub async fn get_file_versions(&self, file_id: i64) -> ClientResult<Vec<FileVersionInfo>> {
        let resp = self
            .bearer(
                self.client
                    .get(format!("{}/api/file/{}/versions", self.base_url, file_id)),
            )
            .send()
            .await?;
        let list: VersionListResponse = Self::ensure_ok(resp).await?.json().await?;
        Ok(list.versions)
    }

    pub async fn remove_file_versions(
        &self,
        file_id: i64,
        min_version: i64,
        max_version: i64,
    ) -> ClientResult<()> {
        let resp = self
            .bearer(self.client.delete(format!(
                "{}/api/file/{}/versions/{}/{}",
                self.base_url, file_id, min_version, max_version
            )))
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    pub async fn get_chunk_list(
        &self,
        file_id: i64,
        version_id: i64,
    ) -> ClientResult<Vec<ChunkInfo>> {
        let resp = self
            .bearer(self.client.get(format!(
                "{}/api/chunk/{}/{}",
                self.base_url, file_id, version_id
            )))
            .send()
            .await?;
        let list: ChunkListResponse = Self::ensure_ok(resp).await?.json().await?;
        Ok(list.chunks)
    }

    /// Fetch one chunk's raw ciphertext.
    pub async fn get_chunk(
        &self,
        file_id: i64,
        version_id: i64,
        chunk_number: i64,
    ) -> ClientResult<Vec<u8>> {
        let resp = self
            .bearer(self.client.get(format!(
                "{}/api/chunk/{}/{}/{}",
                self.base_url, file_id, version_id, chunk_number
            )))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.bytes().await?.to_vec())
    }

    /// Upload one chunk's ciphertext; the plaintext hash rides in the URL.
    pub async fn put_chunk(
        &self,
        file_id: i64,
        version_id: i64,
        chunk_number: i64,
        chunk_hash: &str,
        ciphertext: Vec<u8>,
    ) -> ClientResult<()> {
        let resp = self
            .bearer(self.client.put(format!(
                "{}/api/chunk/{}/{}/{}/{}",
                self.base_url, file_id, version_id, chunk_number, chunk_hash
            )))
            .header("Content-Type", "application/octet-stream")
            .body(ciphertext)
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }
}
