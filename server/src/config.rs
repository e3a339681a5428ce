use rand::RngCore;
use std::net::SocketAddr;

/// Default maximum plaintext chunk length advertised to clients.
pub const DEFAULT_CHUNK_SIZE: i64 = 4 * 1024 * 1024;

/// Fixed allowance for the client's authenticated-encryption envelope on top
/// of a plaintext chunk. Stored ciphertext may never exceed
/// `chunk_size + MAX_CHUNK_OVERHEAD`.
pub const MAX_CHUNK_OVERHEAD: i64 = 128;

/// Immutable server configuration, built once in main and passed by
/// reference into the storage engine and handlers.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub database_path: String,
    pub listen_addr: SocketAddr,
    pub chunk_size: i64,
    pub jwt_secret: String,
}

impl ServerConfig {
    pub fn new(
        database_path: String,
        listen_addr: SocketAddr,
        chunk_size: i64,
        jwt_secret: Option<String>,
    ) -> anyhow::Result<Self> {
        if chunk_size <= 0 {
            anyhow::bail!("chunk size must be positive, got {}", chunk_size);
        }

        // Without a configured secret, tokens do not survive a restart.
        let jwt_secret = match jwt_secret {
            Some(s) if !s.is_empty() => s,
            _ => {
                tracing::warn!("no signing secret configured, generating a random one");
                let mut raw = [0u8; 32];
                rand::rng().fill_bytes(&mut raw);
                hex::encode(raw)
            }
        };

        Ok(ServerConfig {
            database_path,
            listen_addr,
            chunk_size,
            jwt_secret,
        })
    }

    /// Largest ciphertext body accepted for a single chunk upload.
    pub fn max_chunk_bytes(&self) -> i64 {
        self.chunk_size + MAX_CHUNK_OVERHEAD
    }
}
