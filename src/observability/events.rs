//! Security event taxonomy
//!
//! Typed events with a fixed name, category, and severity. Emitted through
//! the [`security_event!`](crate::security_event) macro so every event lands
//! in the logs with the same field shape.

/// Event severity, mapped onto tracing levels by the macro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Security-relevant events emitted by the framework
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Successful login
    AuthenticationSuccess,
    /// Failed login (bad credentials or unknown user)
    AuthenticationFailure,
    /// Login attempt rejected by the lockout window
    LoginBlocked,
    /// New session established
    SessionCreated,
    /// Session destroyed (logout or explicit termination)
    SessionDestroyed,
    /// Session destroyed after exceeding the idle timeout
    SessionTimedOut,
    /// Session ID rotated
    SessionRegenerated,
    /// Authenticated user denied by role/permission checks
    AccessDenied,
    /// Request rejected for a missing or mismatched CSRF token
    CsrfRejected,
    /// Client exceeded the request throttle
    RateLimitExceeded,
    /// Password reset token issued
    PasswordResetIssued,
    /// Password reset completed
    PasswordResetCompleted,
}

impl SecurityEvent {
    /// Stable machine-readable event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess => "authentication_success",
            Self::AuthenticationFailure => "authentication_failure",
            Self::LoginBlocked => "login_blocked",
            Self::SessionCreated => "session_created",
            Self::SessionDestroyed => "session_destroyed",
            Self::SessionTimedOut => "session_timed_out",
            Self::SessionRegenerated => "session_regenerated",
            Self::AccessDenied => "access_denied",
            Self::CsrfRejected => "csrf_rejected",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::PasswordResetIssued => "password_reset_issued",
            Self::PasswordResetCompleted => "password_reset_completed",
        }
    }

    /// Event category for filtering
    pub fn category(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess
            | Self::AuthenticationFailure
            | Self::LoginBlocked => "auth",
            Self::SessionCreated
            | Self::SessionDestroyed
            | Self::SessionTimedOut
            | Self::SessionRegenerated => "session",
            Self::AccessDenied => "access",
            Self::CsrfRejected => "csrf",
            Self::RateLimitExceeded => "throttle",
            Self::PasswordResetIssued | Self::PasswordResetCompleted => "password",
        }
    }

    /// Severity determines the tracing level the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Self::LoginBlocked | Self::CsrfRejected | Self::AccessDenied => Severity::Warning,
            Self::AuthenticationFailure | Self::RateLimitExceeded => Severity::Warning,
            Self::AuthenticationSuccess
            | Self::SessionTimedOut
            | Self::PasswordResetIssued
            | Self::PasswordResetCompleted => Severity::Info,
            Self::SessionCreated
            | Self::SessionDestroyed
            | Self::SessionRegenerated => Severity::Debug,
        }
    }
}

/// Emit a [`SecurityEvent`] through tracing at its severity level.
///
/// Extra fields follow normal `tracing` syntax:
///
/// ```ignore
/// security_event!(SecurityEvent::LoginBlocked,
///     identifier = %identifier, ip = %ip, "Lockout window exceeded");
/// ```
#[macro_export]
macro_rules! security_event {
    ($event:expr) => {
        $crate::security_event!($event, "security event")
    };
    ($event:expr, $($fields:tt)*) => {{
        let __event = $event;
        match __event.severity() {
            $crate::observability::Severity::Error => ::tracing::error!(
                event = __event.name(),
                category = __event.category(),
                $($fields)*
            ),
            $crate::observability::Severity::Warning => ::tracing::warn!(
                event = __event.name(),
                category = __event.category(),
                $($fields)*
            ),
            $crate::observability::Severity::Info => ::tracing::info!(
                event = __event.name(),
                category = __event.category(),
                $($fields)*
            ),
            $crate::observability::Severity::Debug => ::tracing::debug!(
                event = __event.name(),
                category = __event.category(),
                $($fields)*
            ),
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_stable() {
        assert_eq!(SecurityEvent::AuthenticationFailure.name(), "authentication_failure");
        assert_eq!(SecurityEvent::CsrfRejected.name(), "csrf_rejected");
        assert_eq!(SecurityEvent::SessionTimedOut.name(), "session_timed_out");
    }

    #[test]
    fn test_categories() {
        assert_eq!(SecurityEvent::LoginBlocked.category(), "auth");
        assert_eq!(SecurityEvent::SessionRegenerated.category(), "session");
        assert_eq!(SecurityEvent::RateLimitExceeded.category(), "throttle");
    }

    #[test]
    fn test_severities() {
        assert_eq!(SecurityEvent::LoginBlocked.severity(), Severity::Warning);
        assert_eq!(SecurityEvent::AuthenticationSuccess.severity(), Severity::Info);
        assert_eq!(SecurityEvent::SessionCreated.severity(), Severity::Debug);
    }

    #[test]
    fn test_macro_compiles_with_fields() {
        security_event!(SecurityEvent::AuthenticationFailure, identifier = "alice", "failed");
        security_event!(SecurityEvent::SessionCreated);
    }
}
