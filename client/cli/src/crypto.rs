//! Client-side crypto envelope.
//!
//! A passphrase-derived key seals every chunk payload and filename before it
//! leaves the machine; the server stores only ciphertext, opaque digests and
//! a verifier it cannot reverse into the key.
//!
//! Key derivation is Argon2id over (passphrase, random salt) producing 64
//! bytes: the first half is the data key, the second half a verifier. The
//! salt and verifier together form the `CryptoHash` stored server-side, so
//! the same passphrase re-derives the same key on any machine and a wrong
//! passphrase is detected locally.
//!
//! Chunks are sealed with XChaCha20-Poly1305 under a fresh random 24-byte
//! nonce; the stored form is nonce ‖ ciphertext ‖ tag (40 bytes of overhead).
//! Filenames use the same cipher under a derived filename key, but with a
//! synthetic nonce keyed off the plaintext name, so equal names seal to
//! byte-equal strings and the server's (user, name) uniqueness keeps working.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use thiserror::Error;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const VERIFIER_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Bytes the envelope adds on top of a plaintext chunk.
pub const ENVELOPE_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

// Argon2id cost parameters for the data-key KDF: 64 MiB, 3 passes, 4 lanes.
const M_COST_KIB: u32 = 64 * 1024;
const T_COST: u32 = 3;
const P_COST: u32 = 4;

const FILENAME_KEY_CONTEXT: &str = "filefreezer 2024-06 filename key";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    Derive(String),
    #[error("wrong passphrase")]
    WrongPassphrase,
    #[error("stored crypto hash is malformed")]
    MalformedCryptoHash,
    #[error("sealing failed")]
    Seal,
    #[error("opening failed; wrong key or corrupted data")]
    Open,
    #[error("malformed ciphertext")]
    MalformedCiphertext,
}

/// The keys derived from the user's passphrase.
pub struct KeySet {
    data_key: [u8; KEY_LEN],
    filename_key: [u8; KEY_LEN],
}

fn kdf() -> Result<Argon2<'static>, CryptoError> {
    let params = Params::new(M_COST_KIB, T_COST, P_COST, Some(KEY_LEN + VERIFIER_LEN))
        .map_err(|e| CryptoError::Derive(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive_raw(passphrase: &str, salt: &[u8]) -> Result<([u8; KEY_LEN], [u8; VERIFIER_LEN]), CryptoError> {
    let mut out = [0u8; KEY_LEN + VERIFIER_LEN];
    kdf()?
        .hash_password_into(passphrase.as_bytes(), salt, &mut out)
        .map_err(|e| CryptoError::Derive(e.to_string()))?;

    let mut key = [0u8; KEY_LEN];
    let mut verifier = [0u8; VERIFIER_LEN];
    key.copy_from_slice(&out[..KEY_LEN]);
    verifier.copy_from_slice(&out[KEY_LEN..]);
    Ok((key, verifier))
}

impl KeySet {
    fn from_data_key(data_key: [u8; KEY_LEN]) -> Self {
        let filename_key = blake3::derive_key(FILENAME_KEY_CONTEXT, &data_key);
        KeySet {
            data_key,
            filename_key,
        }
    }

    /// First-time setup: derive keys under a fresh salt and return the
    /// crypto hash (salt ‖ verifier) to store on the server.
    pub fn derive(passphrase: &str) -> Result<(KeySet, Vec<u8>), CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);

        let (key, verifier) = derive_raw(passphrase, &salt)?;
        let mut crypto_hash = Vec::with_capacity(SALT_LEN + VERIFIER_LEN);
        crypto_hash.extend_from_slice(&salt);
        crypto_hash.extend_from_slice(&verifier);

        Ok((KeySet::from_data_key(key), crypto_hash))
    }

    /// Re-derive keys from the server-stored crypto hash, verifying the
    /// passphrase in the process.
    pub fn rederive(passphrase: &str, crypto_hash: &[u8]) -> Result<KeySet, CryptoError> {
        if crypto_hash.len() != SALT_LEN + VERIFIER_LEN {
            return Err(CryptoError::MalformedCryptoHash);
        }
        let (salt, stored_verifier) = crypto_hash.split_at(SALT_LEN);

        let (key, verifier) = derive_raw(passphrase, salt)?;
        if !ct_eq(&verifier, stored_verifier) {
            return Err(CryptoError::WrongPassphrase);
        }
        Ok(KeySet::from_data_key(key))
    }

    /// Seal one chunk payload. Empty input is legal and produces the
    /// minimum-size envelope.
    pub fn seal_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher =
            XChaCha20Poly1305::new_from_slice(&self.data_key).map_err(|_| CryptoError::Seal)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Seal)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open one chunk envelope.
    pub fn open_chunk(&self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if envelope.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedCiphertext);
        }
        let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);

        let cipher =
            XChaCha20Poly1305::new_from_slice(&self.data_key).map_err(|_| CryptoError::Open)?;
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Open)
    }

    /// Seal a filename into a URL-safe opaque string.
    ///
    /// The nonce is keyed off the plaintext, so sealing the same name twice
    /// yields the same string. This trades nonce freshness for the equality
    /// the server needs; acceptable here because names are short, low-entropy
    /// identifiers rather than bulk data.
    pub fn seal_filename(&self, name: &str) -> Result<String, CryptoError> {
        let digest = blake3::keyed_hash(&self.filename_key, name.as_bytes());
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest.as_bytes()[..NONCE_LEN]);

        let cipher =
            XChaCha20Poly1305::new_from_slice(&self.filename_key).map_err(|_| CryptoError::Seal)?;
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), name.as_bytes())
            .map_err(|_| CryptoError::Seal)?;

        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Open a sealed filename string.
    pub fn open_filename(&self, sealed: &str) -> Result<String, CryptoError> {
        let raw = URL_SAFE_NO_PAD
            .decode(sealed.as_bytes())
            .map_err(|_| CryptoError::MalformedCiphertext)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedCiphertext);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

        let cipher =
            XChaCha20Poly1305::new_from_slice(&self.filename_key).map_err(|_| CryptoError::Open)?;
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Open)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::MalformedCiphertext)
    }
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    // The KDF is deliberately slow; tests share one derivation.
    fn test_keys() -> (KeySet, Vec<u8>) {
        KeySet::derive("correct horse").expect("derive")
    }

    #[test]
    fn test_rederive_matches_and_verifies() {
        let (keys, crypto_hash) = test_keys();
        assert_eq!(crypto_hash.len(), SALT_LEN + VERIFIER_LEN);

        let again = KeySet::rederive("correct horse", &crypto_hash).unwrap();
        assert_eq!(keys.data_key, again.data_key);

        assert!(matches!(
            KeySet::rederive("battery staple", &crypto_hash),
            Err(CryptoError::WrongPassphrase)
        ));
        assert!(matches!(
            KeySet::rederive("correct horse", &crypto_hash[..10]),
            Err(CryptoError::MalformedCryptoHash)
        ));
    }

    #[test]
    fn test_chunk_roundtrip() {
        let (keys, _) = test_keys();
        let plaintext = b"the quick brown fox";

        let sealed = keys.seal_chunk(plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + ENVELOPE_OVERHEAD);
        assert!(ENVELOPE_OVERHEAD <= 128);

        let opened = keys.open_chunk(&sealed).unwrap();
        assert_eq!(opened, plaintext);

        // Two seals of the same chunk differ (fresh nonces).
        let sealed2 = keys.seal_chunk(plaintext).unwrap();
        assert_ne!(sealed, sealed2);
    }

    #[test]
    fn test_empty_chunk() {
        let (keys, _) = test_keys();
        let sealed = keys.seal_chunk(b"").unwrap();
        assert_eq!(sealed.len(), ENVELOPE_OVERHEAD);
        assert!(keys.open_chunk(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_tamper_rejected() {
        let (keys, _) = test_keys();
        let mut sealed = keys.seal_chunk(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert!(matches!(keys.open_chunk(&sealed), Err(CryptoError::Open)));
        assert!(matches!(
            keys.open_chunk(&sealed[..NONCE_LEN]),
            Err(CryptoError::MalformedCiphertext)
        ));
    }

    #[test]
    fn test_filename_determinism() {
        let (keys, crypto_hash) = test_keys();

        let a = keys.seal_filename("/docs/report.txt").unwrap();
        let b = keys.seal_filename("/docs/report.txt").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, "/docs/report.txt");
        assert_eq!(keys.open_filename(&a).unwrap(), "/docs/report.txt");

        let other = keys.seal_filename("/docs/report2.txt").unwrap();
        assert_ne!(a, other);

        // Same name under the same crypto hash seals identically on a
        // "different machine".
        let rederived = KeySet::rederive("correct horse", &crypto_hash).unwrap();
        assert_eq!(rederived.seal_filename("/docs/report.txt").unwrap(), a);
    }

    #[test]
    fn test_filename_urlsafe() {
        let (keys, _) = test_keys();
        let sealed = keys.seal_filename("/weird name/with spaces?&#").unwrap();
        assert!(sealed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
