//! CSRF token issuance and verification
//!
//! One token per session, created lazily on first access and kept for the
//! session's lifetime. The token is rotated only on login (the session module
//! clears it during `sign_in`, so the next access issues a fresh one).
//! Verification uses constant-time comparison.
//!
//! State-changing requests carry the token either in the `_token` form field
//! or the `X-CSRF-Token` header; the guard middleware rejects mismatches with
//! 403 before any handler logic runs.

use crate::crypto::{constant_time_str_eq, random_token_hex};
use crate::session::Session;

/// Session key holding the token
pub(crate) const CSRF_KEY: &str = "_csrf";

/// Form field clients submit the token in
pub const FORM_FIELD: &str = "_token";

/// Header clients may submit the token in instead
pub const HEADER: &str = "x-csrf-token";

/// Get the session's CSRF token, creating one if none exists yet.
pub fn token(session: &mut Session) -> String {
    if let Some(existing) = session.get_str(CSRF_KEY) {
        return existing.to_string();
    }
    let fresh = random_token_hex();
    session.set(CSRF_KEY, fresh.clone().into());
    fresh
}

/// Verify a submitted token against the session's token.
///
/// Fails when the session has no token (nothing was ever issued) or when the
/// submitted value is absent or differs. Comparison is constant time.
pub fn verify(session: &Session, submitted: Option<&str>) -> bool {
    let Some(expected) = session.get_str(CSRF_KEY) else {
        return false;
    };
    let Some(submitted) = submitted else {
        return false;
    };
    constant_time_str_eq(expected, submitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionManager, SessionPolicy, UserPayload};

    fn open_session() -> (SessionManager, Session) {
        let mgr = SessionManager::in_memory(SessionPolicy::default());
        let (session, _) = mgr.open(None);
        (mgr, session)
    }

    #[test]
    fn test_token_created_lazily_and_stable() {
        let (_mgr, mut session) = open_session();
        assert!(!session.has(CSRF_KEY));

        let first = token(&mut session);
        assert_eq!(first.len(), 64);
        assert!(session.has(CSRF_KEY));

        // Same session, same token
        assert_eq!(token(&mut session), first);
    }

    #[test]
    fn test_verify_accepts_matching_token() {
        let (_mgr, mut session) = open_session();
        let t = token(&mut session);
        assert!(verify(&session, Some(&t)));
    }

    #[test]
    fn test_verify_rejects_mismatch_and_absence() {
        let (_mgr, mut session) = open_session();
        let t = token(&mut session);

        assert!(!verify(&session, Some("forged")));
        assert!(!verify(&session, None));

        let mut off_by_one = t.clone();
        off_by_one.pop();
        off_by_one.push('!');
        assert!(!verify(&session, Some(&off_by_one)));
    }

    #[test]
    fn test_verify_fails_before_any_token_issued() {
        let (_mgr, session) = open_session();
        assert!(!verify(&session, Some("anything")));
    }

    #[test]
    fn test_login_rotates_token() {
        let (_mgr, mut session) = open_session();
        let before = token(&mut session);

        session.sign_in(
            UserPayload {
                id: 1,
                username: "asmith".to_string(),
                full_name: "Alice Smith".to_string(),
                email: "asmith@example.org".to_string(),
                roles: vec![],
                permissions: vec![],
            },
            None,
        );

        let after = token(&mut session);
        assert_ne!(before, after);
    }
}
