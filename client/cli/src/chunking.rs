//! Fixed-size chunking and content digests.
//!
//! Files are split at the server-advertised chunk size; every chunk except
//! possibly the last is full length. Digests are SHA-256 in URL-safe base64
//! so they can travel in URL path segments.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Number of chunks a file of `size` bytes splits into. Empty files have
/// zero chunks.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size)
}

/// Digest of a byte slice (used per chunk).
pub fn digest(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(data))
}

/// Digest of a whole file, streamed so large files never sit in memory.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

/// Read plaintext chunk `number` of a file.
pub fn read_chunk(path: &Path, number: u64, chunk_size: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(number * chunk_size))?;

    let mut buf = Vec::with_capacity(chunk_size as usize);
    file.take(chunk_size).read_to_end(&mut buf)?;
    Ok(buf)
}
