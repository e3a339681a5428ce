//! Login-credential handling.
//!
//! Passwords are never stored; each user carries an opaque random salt and
//! the Argon2id digest of (password, salt). The data-encryption passphrase is
//! a separate client-side concern and never reaches this module.

pub mod token;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use thiserror::Error;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

// Argon2id cost parameters for login hashing: 19 MiB, 2 passes, 1 lane.
const M_COST_KIB: u32 = 19 * 1024;
const T_COST: u32 = 2;
const P_COST: u32 = 1;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token error: {0}")]
    Token(String),
}

fn hasher() -> Result<Argon2<'static>, AuthError> {
    let params = Params::new(M_COST_KIB, T_COST, P_COST, Some(HASH_LEN))
        .map_err(|e| AuthError::Hash(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Generate a fresh random salt for a new or updated user.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Digest a login password with the given salt.
pub fn hash_login_password(password: &str, salt: &[u8]) -> Result<Vec<u8>, AuthError> {
    let mut out = vec![0u8; HASH_LEN];
    hasher()?
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|e| AuthError::Hash(e.to_string()))?;
    Ok(out)
}

/// Check a login attempt against the stored salt and digest.
pub fn verify_login_password(
    password: &str,
    salt: &[u8],
    salted_hash: &[u8],
) -> Result<bool, AuthError> {
    let candidate = hash_login_password(password, salt)?;
    Ok(ct_eq(&candidate, salted_hash))
}

// Constant-time comparison so verification does not leak a matching prefix.
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

    #[test]
    fn test_password_roundtrip() {
        let salt = generate_salt();
        let hash = hash_login_password("1234", &salt).unwrap();

        assert!(verify_login_password("1234", &salt, &hash).unwrap());
        assert!(!verify_login_password("4321", &salt, &hash).unwrap());
    }

    #[test]
    fn test_salt_changes_hash() {
        let a = hash_login_password("1234", &generate_salt()).unwrap();
        let b = hash_login_password("1234", &generate_salt()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncated_hash_rejected() {
        let salt = generate_salt();
        let hash = hash_login_password("1234", &salt).unwrap();
        assert!(!verify_login_password("1234", &salt, &hash[..16]).unwrap());
    }
}
