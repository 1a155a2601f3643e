//! Authentication, lockout, and password reset
//!
//! [`AuthService`] implements the credential flow: every login attempt is
//! checked against the lockout window before credentials are examined, so an
//! attacker inside the window is refused even with a valid password. Failure
//! messages never distinguish an unknown username from a wrong password, and
//! every attempt leaves a `login_attempts` row and an audit entry.
//!
//! Successful logins cache the user's roles and permissions in the session
//! (authorization checks afterwards read the session, not the database) and
//! rotate the session ID.
//!
//! Password resets issue a single-use 256-bit token valid for one hour.
//!
//! The service is generic over a [`UserRepo`]; [`PgUserRepo`] is the
//! production implementation, and tests run against an in-memory fake.
//!
//! # Usage
//!
//! ```ignore
//! use triage::auth::{AuthPolicy, AuthService, PgUserRepo, RequestMeta};
//!
//! let auth = AuthService::new(PgUserRepo::new(pool), AuthPolicy::from_config(&config));
//!
//! let meta = RequestMeta::from_ctx(&ctx);
//! let mut session = ctx.session();
//! let user = auth.attempt(&mut session, "asmith", "secret", &meta).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::crypto::random_token_hex;
use crate::error::{AppError, Result};
use crate::observability::SecurityEvent;
use crate::password::{hash_password, verify_password, PasswordError, PasswordPolicy};
use crate::request::RequestContext;
use crate::security_event;
use crate::session::{Session, UserPayload};

/// Shown for unknown usernames, wrong passwords, and inactive accounts
/// alike, so responses cannot be used to enumerate accounts.
const GENERIC_FAILURE: &str = "Invalid username or password.";

const BLOCKED_MESSAGE: &str = "Too many failed login attempts. Please try again later.";

// ============================================================================
// Policy
// ============================================================================

/// Lockout and reset policy
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    /// Failed attempts tolerated inside the window (default 5)
    pub max_attempts: u32,
    /// Window over which failures are counted (default 15m)
    pub lockout_window: Duration,
    /// How long a password reset token stays valid (default 1h)
    pub reset_token_ttl: Duration,
    /// Requirements for new passwords
    pub passwords: PasswordPolicy,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_window: Duration::from_secs(900),
            reset_token_ttl: Duration::from_secs(3600),
            passwords: PasswordPolicy::default(),
        }
    }
}

impl AuthPolicy {
    /// Derive the policy from application configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.login_max_attempts,
            lockout_window: config.login_lockout_window,
            ..Self::default()
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// A user row as the authentication flow sees it
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub full_name: String,
    pub email: String,
    pub is_active: bool,
}

/// Outcome recorded for a login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    /// Credentials rejected
    Failed,
    /// Credentials accepted
    Success,
    /// Refused by the lockout window before credentials were examined
    Blocked,
}

impl AttemptResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Success => "success",
            Self::Blocked => "blocked",
        }
    }
}

/// One row in the login attempt log
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub username: String,
    pub ip_address: String,
    pub result: AttemptResult,
    pub user_agent: Option<String>,
}

/// One row in the audit trail
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: Option<i64>,
    pub username: String,
    pub action: String,
    pub module: String,
    /// Table the action touched, when it maps to one
    pub table_name: Option<String>,
    /// Primary key of the touched record, when it maps to one
    pub record_id: Option<i64>,
    pub description: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub request_method: String,
    pub request_url: String,
}

/// Request attribution recorded with attempts and audit entries
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub ip: String,
    pub user_agent: Option<String>,
    pub method: String,
    pub url: String,
}

impl RequestMeta {
    pub fn from_ctx(ctx: &RequestContext) -> Self {
        Self {
            ip: ctx.client_ip.clone(),
            user_agent: ctx.user_agent().map(str::to_string),
            method: ctx.method.to_string(),
            url: ctx.path.clone(),
        }
    }
}

// ============================================================================
// Repository seam
// ============================================================================

/// Persistence operations the authentication flow depends on.
///
/// Production uses [`PgUserRepo`]; tests substitute an in-memory fake.
pub trait UserRepo: Send + Sync {
    fn find_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<UserRecord>>> + Send;

    fn find_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<UserRecord>>> + Send;

    fn roles_for(&self, user_id: i64) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn permissions_for(&self, user_id: i64) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Failed attempts since `since` matching the username or the address.
    fn failed_attempts_since(
        &self,
        username: &str,
        ip: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<i64>> + Send;

    fn record_attempt(&self, attempt: &LoginAttempt) -> impl Future<Output = Result<()>> + Send;

    fn record_audit(&self, entry: &AuditEntry) -> impl Future<Output = Result<()>> + Send;

    fn touch_last_login(
        &self,
        user_id: i64,
        ip: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn store_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Atomically mark an unused, unexpired token as used, returning its
    /// user. `None` means invalid, expired, or already used.
    fn consume_reset_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<i64>>> + Send;

    fn update_password(
        &self,
        user_id: i64,
        password_hash: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Postgres-backed [`UserRepo`]
#[derive(Debug, Clone)]
pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserRepo for PgUserRepo {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, password_hash, full_name, email, is_active \
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, password_hash, full_name, email, is_active \
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn roles_for(&self, user_id: i64) -> Result<Vec<String>> {
        let roles = sqlx::query_scalar::<_, String>(
            "SELECT r.name FROM roles r \
             JOIN user_roles ur ON ur.role_id = r.id \
             WHERE ur.user_id = $1 ORDER BY r.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn permissions_for(&self, user_id: i64) -> Result<Vec<String>> {
        let permissions = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT p.name FROM permissions p \
             JOIN role_permissions rp ON rp.permission_id = p.id \
             JOIN user_roles ur ON ur.role_id = rp.role_id \
             WHERE ur.user_id = $1 ORDER BY p.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(permissions)
    }

    async fn failed_attempts_since(
        &self,
        username: &str,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM login_attempts \
             WHERE (username = $1 OR ip_address = $2) \
             AND attempt_result = 'failed' AND attempted_at >= $3",
        )
        .bind(username)
        .bind(ip)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn record_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        sqlx::query(
            "INSERT INTO login_attempts \
             (username, ip_address, attempt_result, user_agent, attempted_at) \
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(&attempt.username)
        .bind(&attempt.ip_address)
        .bind(attempt.result.as_str())
        .bind(&attempt.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs \
             (user_id, username, action, module, table_name, record_id, \
              description, ip_address, user_agent, request_method, \
              request_url, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())",
        )
        .bind(entry.user_id)
        .bind(&entry.username)
        .bind(&entry.action)
        .bind(&entry.module)
        .bind(&entry.table_name)
        .bind(entry.record_id)
        .bind(&entry.description)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.request_method)
        .bind(&entry.request_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_last_login(&self, user_id: i64, ip: &str) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = NOW(), last_login_ip = $2 WHERE id = $1")
            .bind(user_id)
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn store_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO password_resets (user_id, token, expires_at, used, created_at) \
             VALUES ($1, $2, $3, FALSE, NOW())",
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_reset_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "UPDATE password_resets SET used = TRUE \
             WHERE token = $1 AND used = FALSE AND expires_at > $2 \
             RETURNING user_id",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id)
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Service
// ============================================================================

/// The authentication flow over a [`UserRepo`]
pub struct AuthService<R: UserRepo> {
    repo: R,
    policy: AuthPolicy,
}

impl<R: UserRepo> AuthService<R> {
    pub fn new(repo: R, policy: AuthPolicy) -> Self {
        Self { repo, policy }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Attempt a login. The identifier may be a username or an email address.
    ///
    /// The lockout window is checked before credentials: once the failure
    /// threshold is reached, further attempts inside the window are refused
    /// even when the password is correct. On success the user's roles and
    /// permissions are cached in the session and its ID is rotated.
    pub async fn attempt(
        &self,
        session: &mut Session,
        identifier: &str,
        password: &str,
        meta: &RequestMeta,
    ) -> Result<UserPayload> {
        let since = Utc::now()
            - chrono::Duration::from_std(self.policy.lockout_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(900));

        let failures = self
            .repo
            .failed_attempts_since(identifier, &meta.ip, since)
            .await?;

        if failures >= self.policy.max_attempts as i64 {
            self.log_attempt(identifier, meta, AttemptResult::Blocked).await;
            security_event!(SecurityEvent::LoginBlocked,
                identifier = %identifier, ip = %meta.ip, failures = failures,
                "Login refused by lockout window");
            return Err(AppError::rate_limited(BLOCKED_MESSAGE));
        }

        // The login form accepts either the username or the email address.
        let record = match self.repo.find_by_username(identifier).await? {
            Some(u) => Some(u),
            None => self.repo.find_by_email(identifier).await?,
        };

        let user = match record {
            Some(u) if u.is_active && verify_password(password, &u.password_hash) => u,
            _ => {
                self.log_attempt(identifier, meta, AttemptResult::Failed).await;
                self.audit(meta, None, identifier, "login_failed", "Failed login attempt")
                    .await;
                security_event!(SecurityEvent::AuthenticationFailure,
                    identifier = %identifier, ip = %meta.ip);
                return Err(AppError::unauthorized(GENERIC_FAILURE));
            }
        };

        let roles = self.repo.roles_for(user.id).await?;
        let permissions = self.repo.permissions_for(user.id).await?;
        let payload = UserPayload {
            id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            roles,
            permissions,
        };

        session.sign_in(payload.clone(), Some(&meta.ip));
        self.repo.touch_last_login(user.id, &meta.ip).await?;
        self.log_attempt(identifier, meta, AttemptResult::Success).await;
        self.audit(meta, Some(user.id), identifier, "login", "User logged in")
            .await;
        security_event!(SecurityEvent::AuthenticationSuccess,
            user_id = user.id, identifier = %identifier, ip = %meta.ip);

        Ok(payload)
    }

    /// Audit and destroy the current session.
    pub async fn logout(&self, session: &mut Session, meta: &RequestMeta) -> Result<()> {
        if let Some(user) = session.user() {
            self.audit(meta, Some(user.id), &user.username, "logout", "User logged out")
                .await;
        }
        session.destroy();
        Ok(())
    }

    /// Issue a password reset token for the account with this email.
    ///
    /// Returns `None` for unknown or inactive accounts; callers must respond
    /// identically in both cases so the endpoint does not reveal which
    /// addresses are registered. The token itself goes out by email, never
    /// in the HTTP response.
    pub async fn issue_reset_token(
        &self,
        email: &str,
        meta: &RequestMeta,
    ) -> Result<Option<String>> {
        let Some(user) = self.repo.find_by_email(email).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }

        let token = random_token_hex();
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.policy.reset_token_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        self.repo.store_reset_token(user.id, &token, expires_at).await?;

        self.audit(
            meta,
            Some(user.id),
            &user.username,
            "password_reset_request",
            "Password reset token issued",
        )
        .await;
        security_event!(SecurityEvent::PasswordResetIssued, user_id = user.id);

        Ok(Some(token))
    }

    /// Complete a password reset. The token is single-use: consuming it
    /// invalidates it whether or not a previous attempt succeeded.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        meta: &RequestMeta,
    ) -> Result<()> {
        self.policy
            .passwords
            .validate(new_password)
            .map_err(password_validation_error)?;

        let Some(user_id) = self.repo.consume_reset_token(token, Utc::now()).await? else {
            return Err(AppError::bad_request(
                "This password reset link is invalid or has expired.",
            ));
        };

        let hash = hash_password(new_password).map_err(|e| match e {
            PasswordError::HashingFailed => AppError::internal_msg("Password hashing failed"),
            other => password_validation_error(other),
        })?;
        self.repo.update_password(user_id, &hash).await?;

        self.audit(
            meta,
            Some(user_id),
            "",
            "password_reset",
            "Password reset completed",
        )
        .await;
        security_event!(SecurityEvent::PasswordResetCompleted, user_id = user_id);

        Ok(())
    }

    // Attempt and audit bookkeeping never aborts the request; a write
    // failure is logged and the flow continues.
    async fn log_attempt(&self, username: &str, meta: &RequestMeta, result: AttemptResult) {
        let attempt = LoginAttempt {
            username: username.to_string(),
            ip_address: meta.ip.clone(),
            result,
            user_agent: meta.user_agent.clone(),
        };
        if let Err(err) = self.repo.record_attempt(&attempt).await {
            tracing::error!(error = %err, identifier = %username,
                "Failed to record login attempt");
        }
    }

    async fn audit(
        &self,
        meta: &RequestMeta,
        user_id: Option<i64>,
        username: &str,
        action: &str,
        description: &str,
    ) {
        let entry = AuditEntry {
            user_id,
            username: username.to_string(),
            action: action.to_string(),
            module: "auth".to_string(),
            table_name: Some("users".to_string()),
            record_id: user_id,
            description: description.to_string(),
            ip_address: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            request_method: meta.method.clone(),
            request_url: meta.url.clone(),
        };
        if let Err(err) = self.repo.record_audit(&entry).await {
            tracing::error!(error = %err, action = %action, "Failed to record audit entry");
        }
    }
}

fn password_validation_error(err: PasswordError) -> AppError {
    let mut errors = std::collections::BTreeMap::new();
    errors.insert("password".to_string(), err.to_string());
    AppError::validation(errors)
}

// ============================================================================
// Tests
// ============================================================================
