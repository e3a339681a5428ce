use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Bearer tokens are short-lived; clients re-login rather than refresh.
const TOKEN_MINUTES: i64 = 20;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User ID
    uid: i64,
    /// Username
    name: String,
    /// Expiration time (Unix seconds)
    exp: i64,
    /// Issued at (Unix seconds)
    iat: i64,
}

/// The authenticated identity carried by a verified token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub expires_at: i64,
}

/// Issue a signed bearer token for a logged-in user.
pub fn create_token(secret: &str, user_id: i64, username: &str) -> Result<String, AuthError> {
    let now = Utc::now();
    let exp = now + Duration::minutes(TOKEN_MINUTES);

    let claims = Claims {
        uid: user_id,
        name: username.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Token(e.to_string()))
}

/// Verify a bearer token and extract the authenticated user.
///
/// The expiry is checked again here even though the decoder already
/// validates it; callers get a hard guarantee independent of library
/// defaults.
pub fn verify_token(secret: &str, token: &str) -> Result<AuthUser, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AuthError::Token(e.to_string()))?;

    if data.claims.exp <= Utc::now().timestamp() {
        return Err(AuthError::Token("token expired".to_string()));
    }

    Ok(AuthUser {
        user_id: data.claims.uid,
        username: data.claims.name,
        expires_at: data.claims.exp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        let secret = "test_secret";

        let token = create_token(secret, 42, "admin").unwrap();
        let user = verify_token(secret, &token).unwrap();

        assert_eq!(user.user_id, 42);
        assert_eq!(user.username, "admin");
        assert!(user.expires_at > Utc::now().timestamp());
    }

    #[test]
    fn test_invalid_token() {
        assert!(verify_token("test_secret", "invalid_token").is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let token = create_token("secret_a", 1, "admin").unwrap();
        assert!(verify_token("secret_b", &token).is_err());
    }
}
