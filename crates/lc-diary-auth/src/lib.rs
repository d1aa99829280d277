//! Identity layer for LC Diary.
//!
//! - [`token`]: HS256 token issue/verify against a process-wide secret
//! - [`resolver`]: bearer header to [`lc_diary_core::Caller`]
//! - [`password`]: Argon2id credential hashing

pub mod error;
pub mod password;
pub mod resolver;
pub mod token;

pub use error::{PasswordError, TokenError};
pub use password::{burn_verification, hash_password, verify_password};
pub use resolver::{bearer_token, require_account, resolve_caller, BEARER_PREFIX};
pub use token::{
    Claims, IssuedToken, SigningSecret, TokenService, DEFAULT_TOKEN_TTL, TOKEN_ALGORITHM,
};
