//! Password hashing and reset-time policy
//!
//! Hashing uses Argon2id with per-password random salts. Verification never
//! reveals whether the hash or the password was at fault. A small policy
//! screen is applied when users choose a new password (reset or change).
//!
//! # Usage
//!
//! ```ignore
//! use triage::password::{hash_password, verify_password, PasswordPolicy};
//!
//! let hash = hash_password("correct horse battery staple")?;
//! assert!(verify_password("correct horse battery staple", &hash));
//!
//! PasswordPolicy::default().validate("new-password-123")?;
//! ```

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use thiserror::Error;

/// Reason a candidate password was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("Password must be at least {0} characters")]
    TooShort(usize),
    #[error("Password is too common")]
    TooCommon,
    #[error("Password hashing failed")]
    HashingFailed,
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| PasswordError::HashingFailed)
}

/// Verify a password against a stored PHC-format hash.
///
/// Malformed hashes verify as false rather than erroring, so a corrupted
/// row behaves like a wrong password.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Minimum requirements for a user-chosen password
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    /// Minimum length in characters
    pub min_length: usize,
    /// Reject passwords found in the common-password screen
    pub reject_common: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            reject_common: true,
        }
    }
}

// Screen for the worst offenders only; length does most of the work.
const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "password123", "12345678", "123456789", "1234567890",
    "qwerty123", "qwertyuiop", "iloveyou", "admin123", "letmein1", "welcome1",
    "sunshine", "princess", "football", "baseball", "superman", "trustno1",
];

impl PasswordPolicy {
    /// Check a candidate password against the policy.
    pub fn validate(&self, password: &str) -> Result<(), PasswordError> {
        if password.chars().count() < self.min_length {
            return Err(PasswordError::TooShort(self.min_length));
        }
        if self.reject_common && COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
            return Err(PasswordError::TooCommon);
        }
        Ok(())
    }
}
