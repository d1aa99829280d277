//! Stateless HS256 identity tokens.
//!
//! A token carries the account id as `sub` and an absolute `exp`. Nothing is
//! persisted; every request re-verifies the signature against the
//! process-wide secret.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lc_diary_core::AccountId;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::TokenError;

/// The only algorithm accepted on verification.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Lifetime of tokens issued at login.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::hours(72);

/// HMAC key material. Loaded once at startup and never mutated.
#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub const MIN_LEN: usize = 32;

    /// Validate raw secret bytes.
    ///
    /// # Errors
    /// Returns `TokenError::WeakSecret` when the secret is blank or shorter
    /// than [`Self::MIN_LEN`] bytes.
    pub fn new(raw: impl Into<Vec<u8>>) -> Result<Self, TokenError> {
        let raw = raw.into();
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(TokenError::WeakSecret("signing secret is empty".to_string()));
        }
        if raw.len() < Self::MIN_LEN {
            return Err(TokenError::WeakSecret(format!(
                "signing secret must be at least {} bytes, got {}",
                Self::MIN_LEN,
                raw.len()
            )));
        }
        Ok(Self(raw))
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: &SigningSecret) -> Self {
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(&secret.0),
            decoding: DecodingKey::from_secret(&secret.0),
            validation,
        }
    }

    /// Sign a token for `subject` that expires `ttl` from now.
    ///
    /// # Errors
    /// Returns `TokenError::SigningFailure` when the signing primitive fails.
    pub fn issue(&self, subject: AccountId, ttl: Duration) -> Result<IssuedToken, TokenError> {
        let issued_at = OffsetDateTime::now_utc();
        let expires_at = issued_at + ttl;
        let claims = Claims {
            sub: subject.to_string(),
            exp: unix_seconds(expires_at),
            iat: unix_seconds(issued_at),
        };

        let token = encode(&Header::new(TOKEN_ALGORITHM), &claims, &self.encoding)
            .map_err(|err| TokenError::SigningFailure(err.to_string()))?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Verify a token and return the account it was issued for.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidToken` for malformed tokens, any algorithm
    /// other than HS256, signature mismatch, or a subject that is not an
    /// account id. Returns `TokenError::ExpiredToken` when the signature is
    /// valid but `exp` has passed.
    pub fn verify(&self, token: &str) -> Result<AccountId, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        data.claims
            .sub
            .parse::<AccountId>()
            .map_err(|_| TokenError::InvalidToken("subject is not an account id".to_string()))
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").field("algorithm", &TOKEN_ALGORITHM).finish_non_exhaustive()
    }
}

fn unix_seconds(value: OffsetDateTime) -> u64 {
    u64::try_from(value.unix_timestamp()).unwrap_or(0)
}
