//! Authentication error types.

use thiserror::Error;

/// Token issuance and verification failures.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum TokenError {
    /// Malformed token, unexpected algorithm, or signature mismatch.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Signature checked out but the expiry has elapsed.
    #[error("token expired")]
    ExpiredToken,

    #[error("failed to sign token: {0}")]
    SigningFailure(String),

    /// Rejected signing secret at startup.
    #[error("weak signing secret: {0}")]
    WeakSecret(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::ExpiredToken,
            ErrorKind::InvalidSignature => Self::InvalidToken("signature mismatch".to_string()),
            ErrorKind::InvalidAlgorithm => {
                Self::InvalidToken("unexpected signing algorithm".to_string())
            }
            ErrorKind::InvalidToken => Self::InvalidToken("malformed token".to_string()),
            _ => Self::InvalidToken(format!("token rejected: {err}")),
        }
    }
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    Hashing(String),
}
