//! Map a request's `Authorization` header to a [`Caller`].

use lc_diary_core::{AccountId, Caller, DiaryError};

use crate::error::TokenError;
use crate::token::TokenService;

pub const BEARER_PREFIX: &str = "Bearer ";

/// Extract the token from a `Bearer` credential. Returns `None` when the
/// header is absent or uses another scheme.
#[must_use]
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?.strip_prefix(BEARER_PREFIX)
}

/// Resolve the caller for one request.
///
/// A missing header, or one without the `Bearer ` scheme, resolves to
/// [`Caller::Anonymous`]. A bearer token that fails verification is never
/// downgraded to anonymous.
///
/// # Errors
/// Returns `DiaryError::Unauthenticated` when a bearer token is present but
/// invalid or expired.
pub fn resolve_caller(header: Option<&str>, tokens: &TokenService) -> Result<Caller, DiaryError> {
    let Some(token) = bearer_token(header) else {
        return Ok(Caller::Anonymous);
    };

    match tokens.verify(token) {
        Ok(account) => Ok(Caller::Authenticated(account)),
        Err(err) => {
            tracing::debug!(error = %err, "bearer token rejected");
            Err(match err {
                TokenError::ExpiredToken => DiaryError::Unauthenticated("token expired".to_string()),
                _ => DiaryError::Unauthenticated("invalid token".to_string()),
            })
        }
    }
}

/// Gate for endpoints that make no sense for the shared guest identity.
///
/// # Errors
/// Returns `DiaryError::Unauthenticated` for [`Caller::Anonymous`].
pub fn require_account(caller: Caller) -> Result<AccountId, DiaryError> {
    match caller {
        Caller::Authenticated(account) => Ok(account),
        Caller::Anonymous => {
            Err(DiaryError::Unauthenticated("authentication required".to_string()))
        }
    }
}
