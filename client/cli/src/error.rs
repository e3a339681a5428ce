use thiserror::Error;

/// Client-side failures, kept as categories so callers can tell a policy
/// gap from a transport fault.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The reconciler found a difference its policy table does not resolve.
    #[error("unreconciled difference: {0}")]
    Unreconciled(String),
    #[error("version {0} not found")]
    VersionNotFound(i64),
    #[error("nothing to sync: {0}")]
    NothingToSync(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
