//! Row types for the storage engine.
//!
//! All identifiers are server-assigned rowids. Hashes and encrypted names
//! are opaque to the server; it never interprets them beyond equality.

use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub user_id: i64,
    pub name: String,
    pub salt: Vec<u8>,
    pub salted_hash: Vec<u8>,
    /// Verifier for the client's data passphrase. The server stores it
    /// opaquely and never learns the derived key.
    pub crypto_hash: Vec<u8>,
}

/// Per-user accounting: allocated is the sum of stored ciphertext lengths,
/// revision increments on every mutation of user-owned state.
#[derive(Debug, Clone, Copy, Serialize, sqlx::FromRow)]
pub struct UserStats {
    pub quota: i64,
    pub allocated: i64,
    pub revision: i64,
}

/// One version of a file's content. Version numbers are 1-based, dense and
/// strictly increasing per file.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FileVersion {
    pub version_id: i64,
    pub file_id: i64,
    pub version_number: i64,
    pub permissions: u32,
    pub last_mod: i64,
    pub chunk_count: i64,
    pub file_hash: String,
}

/// A file entry joined with its current version, the shape every file-scoped
/// read returns.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FileInfo {
    pub file_id: i64,
    pub user_id: i64,
    /// Client-encrypted name; used only for equality lookup and prefix match.
    pub file_name: String,
    pub is_dir: bool,
    pub version_id: i64,
    pub version_number: i64,
    pub permissions: u32,
    pub last_mod: i64,
    pub chunk_count: i64,
    pub file_hash: String,
}

/// A stored chunk record including the ciphertext payload.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileChunk {
    pub file_id: i64,
    pub version_id: i64,
    pub chunk_number: i64,
    pub chunk_hash: String,
    pub chunk: Vec<u8>,
}

/// Chunk metadata without the payload, for manifest listings.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChunkInfo {
    pub chunk_number: i64,
    pub chunk_hash: String,
}
