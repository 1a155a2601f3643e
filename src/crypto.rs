//! Constant-time comparison and token generation
//!
//! Comparisons used for security decisions (CSRF tokens, reset tokens) must
//! not leak the position of the first differing byte through timing. All
//! comparisons here go through the `subtle` crate.
//!
//! # Usage
//!
//! ```ignore
//! use triage::crypto::{constant_time_str_eq, random_token_hex};
//!
//! let token = random_token_hex();           // 64 hex chars, 256 bits
//! assert!(constant_time_str_eq(&token, &token));
//! ```

use rand::RngCore;
use subtle::ConstantTimeEq;

/// Number of random bytes in a generated token (256 bits)
pub const TOKEN_BYTES: usize = 32;

/// Compare two byte slices in constant time.
///
/// Returns false for slices of different lengths. The length check itself is
/// not constant time, but token lengths are public.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Compare two strings in constant time.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Generate a 256-bit random token encoded as lowercase hex (64 chars).
///
/// Used for session IDs, CSRF tokens, and password reset tokens.
pub fn random_token_hex() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    encode_hex(&bytes)
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq_equal() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(constant_time_str_eq("token123", "token123"));
    }

    #[test]
    fn test_constant_time_eq_different() {
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_str_eq("token123", "token124"));
    }

    #[test]
    fn test_constant_time_eq_length_mismatch() {
        assert!(!constant_time_eq(b"short", b"longer value"));
        assert!(!constant_time_str_eq("", "x"));
    }

    #[test]
    fn test_random_token_shape() {
        let token = random_token_hex();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_random_tokens_unique() {
        assert_ne!(random_token_hex(), random_token_hex());
    }

    #[test]
    fn test_encode_hex() {
        assert_eq!(encode_hex(&[0x00, 0xff, 0x0a]), "00ff0a");
    }
}
