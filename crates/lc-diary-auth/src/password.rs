//! Argon2id credential hashing.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::PasswordError;

const SALT_BYTES: usize = 16;

/// Fixed salt for [`burn_verification`]; its output is never stored.
const BURN_SALT: &str = "bGMtZGlhcnktYnVybg";

/// Hash a password into a PHC string with a fresh random salt.
///
/// # Errors
/// Returns `PasswordError::Hashing` when randomness or hashing fails.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let mut salt_bytes = [0u8; SALT_BYTES];
    getrandom::getrandom(&mut salt_bytes).map_err(|err| PasswordError::Hashing(err.to_string()))?;
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|err| PasswordError::Hashing(err.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| PasswordError::Hashing(err.to_string()))
}

/// Check a password against a stored PHC string. Unparseable hashes never match.
#[must_use]
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// Spend one hash computation so unknown usernames cost the same as wrong
/// passwords.
pub fn burn_verification(password: &str) {
    if let Ok(salt) = SaltString::from_b64(BURN_SALT) {
        let _ = Argon2::default().hash_password(password.as_bytes(), &salt);
    }
}
