//! Session management
//!
//! Sessions are explicit objects handed to handlers, backed by a pluggable
//! [`SessionStore`]. The manager enforces two clocks: an idle timeout (a
//! session untouched for longer than the limit is destroyed and the browser
//! is redirected to the login page with a timeout indicator) and a
//! regeneration interval (the session ID is rotated periodically, and always
//! on login, to limit fixation).
//!
//! Session cookies are HttpOnly and SameSite=Strict, and carry the Secure
//! flag in production.
//!
//! # Usage
//!
//! ```ignore
//! use triage::session::{SessionManager, SessionPolicy};
//!
//! let sessions = SessionManager::in_memory(SessionPolicy::default());
//! let (mut session, _) = sessions.open(None);
//! session.set("theme", "dark".into());
//! sessions.save(&mut session);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::crypto::random_token_hex;
use crate::observability::SecurityEvent;
use crate::security_event;

// ============================================================================
// Policy
// ============================================================================

/// Session lifecycle policy
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Cookie name
    pub cookie_name: String,
    /// Idle time after which the session is destroyed (default 2h)
    pub idle_timeout: Duration,
    /// Age after which the session ID is rotated (default 30m)
    pub regenerate_interval: Duration,
    /// Set the Secure flag on the cookie (production)
    pub secure_cookie: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            cookie_name: "APP_SESSION".to_string(),
            idle_timeout: Duration::from_secs(7200),
            regenerate_interval: Duration::from_secs(1800),
            secure_cookie: false,
        }
    }
}

impl SessionPolicy {
    /// Derive the policy from application configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cookie_name: config.session_cookie.clone(),
            idle_timeout: config.session_idle_timeout,
            regenerate_interval: config.session_regenerate_interval,
            secure_cookie: config.environment.is_production(),
        }
    }
}

/// Why a presented session was terminated during `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTerminationReason {
    /// Idle timeout exceeded
    IdleTimeout,
}

impl SessionTerminationReason {
    /// Stable code, usable as a query-string indicator
    pub fn code(&self) -> &'static str {
        match self {
            Self::IdleTimeout => "timeout",
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Raw session payload persisted by a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// Arbitrary key/value entries
    pub values: HashMap<String, Value>,
    /// Unix timestamp when the current ID was issued
    pub created: i64,
    /// Unix timestamp of the last request that touched the session
    pub last_activity: i64,
}

impl SessionData {
    /// Empty payload with both clocks set to `now`
    pub fn new(now: i64) -> Self {
        Self {
            values: HashMap::new(),
            created: now,
            last_activity: now,
        }
    }
}

/// Backing storage for sessions.
///
/// The in-memory implementation is suitable for a single process; a shared
/// store (Redis, Postgres) can be dropped in behind the same trait.
pub trait SessionStore: Send + Sync {
    fn load(&self, id: &str) -> Option<SessionData>;
    fn save(&self, id: &str, data: &SessionData);
    fn delete(&self, id: &str);
}

/// In-process session store
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions (test and diagnostics helper)
    pub fn len(&self) -> usize {
        self.sessions.read().expect("session store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, id: &str) -> Option<SessionData> {
        self.sessions
            .read()
            .expect("session store lock poisoned")
            .get(id)
            .cloned()
    }

    fn save(&self, id: &str, data: &SessionData) {
        self.sessions
            .write()
            .expect("session store lock poisoned")
            .insert(id.to_string(), data.clone());
    }

    fn delete(&self, id: &str) {
        self.sessions
            .write()
            .expect("session store lock poisoned")
            .remove(id);
    }
}

// ============================================================================
// Session handle
// ============================================================================

/// User identity cached in the session at login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A flash message, shown once and then discarded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flash {
    /// success, error, warning, info
    pub kind: String,
    pub message: String,
}

const FLASH_KEY: &str = "_flash";
const USER_KEY: &str = "_user";
const LOGIN_TIME_KEY: &str = "_login_time";
const LOGIN_IP_KEY: &str = "_login_ip";

/// Shared session handle, cloneable across middleware and handlers within
/// one request
pub type SessionHandle = Arc<RwLock<Session>>;

/// A live session for the duration of one request.
///
/// Mutations are buffered in memory; the manager persists them (and
/// invalidates any superseded IDs) when `save` is called at the end of the
/// request.
#[derive(Debug)]
pub struct Session {
    id: String,
    data: SessionData,
    destroyed: bool,
    /// IDs superseded by regeneration this request, deleted on save
    stale_ids: Vec<String>,
}

impl Session {
    fn fresh(now: i64) -> Self {
        Self {
            id: random_token_hex(),
            data: SessionData::new(now),
            destroyed: false,
            stale_ids: Vec::new(),
        }
    }

    /// Wrap the session in a shared handle for the request pipeline
    pub fn into_handle(self) -> SessionHandle {
        Arc::new(RwLock::new(self))
    }

    /// Current session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.values.get(key)
    }

    /// Get a string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// Set a value
    pub fn set(&mut self, key: &str, value: Value) {
        self.data.values.insert(key.to_string(), value);
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) {
        self.data.values.remove(key);
    }

    /// Whether a key exists
    pub fn has(&self, key: &str) -> bool {
        self.data.values.contains_key(key)
    }

    /// Set a flash message (overwrites any pending one)
    pub fn set_flash(&mut self, kind: &str, message: &str) {
        let flash = Flash {
            kind: kind.to_string(),
            message: message.to_string(),
        };
        if let Ok(value) = serde_json::to_value(flash) {
            self.set(FLASH_KEY, value);
        }
    }

    /// Take the pending flash message, clearing it
    pub fn take_flash(&mut self) -> Option<Flash> {
        let value = self.data.values.remove(FLASH_KEY)?;
        serde_json::from_value(value).ok()
    }

    /// Rotate the session ID, keeping the data. The old ID is invalidated
    /// when the session is saved.
    pub fn regenerate(&mut self) {
        let old = std::mem::replace(&mut self.id, random_token_hex());
        self.stale_ids.push(old);
        self.data.created = chrono::Utc::now().timestamp();
        security_event!(SecurityEvent::SessionRegenerated, session = %redact(&self.id));
    }

    /// Cache the authenticated user in the session.
    ///
    /// Rotates the session ID first (fixation), clears any pending CSRF
    /// token so a new one is issued post-login, and stamps login time/IP.
    pub fn sign_in(&mut self, user: UserPayload, ip: Option<&str>) {
        self.regenerate();
        self.remove(crate::csrf::CSRF_KEY);
        if let Ok(value) = serde_json::to_value(user) {
            self.set(USER_KEY, value);
        }
        self.set(LOGIN_TIME_KEY, chrono::Utc::now().timestamp().into());
        if let Some(ip) = ip {
            self.set(LOGIN_IP_KEY, ip.into());
        }
    }

    /// The cached user, if authenticated
    pub fn user(&self) -> Option<UserPayload> {
        let value = self.get(USER_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn is_authenticated(&self) -> bool {
        self.has(USER_KEY)
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user().map(|u| u.id)
    }

    pub fn username(&self) -> Option<String> {
        self.user().map(|u| u.username)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.user()
            .map(|u| u.roles.iter().any(|r| r == role))
            .unwrap_or(false)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.user()
            .map(|u| u.permissions.iter().any(|p| p == permission))
            .unwrap_or(false)
    }

    /// Mark the session for deletion at save time
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.data.values.clear();
        security_event!(SecurityEvent::SessionDestroyed, session = %redact(&self.id));
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

// Log prefixes only; full session IDs never appear in logs.
fn redact(id: &str) -> &str {
    &id[..id.len().min(8)]
}

// ============================================================================
// Manager
// ============================================================================

/// Opens, persists, and expires sessions against a store
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, policy: SessionPolicy) -> Self {
        Self { store, policy }
    }

    /// Manager over an in-process store
    pub fn in_memory(policy: SessionPolicy) -> Self {
        Self::new(Arc::new(MemoryStore::new()), policy)
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Open the session for a request.
    ///
    /// Returns a fresh session when no valid cookie is presented. When the
    /// presented session has exceeded the idle timeout it is destroyed and
    /// the reason is returned so the caller can redirect with an indicator.
    /// A session older than the regeneration interval gets a new ID.
    pub fn open(&self, cookie_id: Option<&str>) -> (Session, Option<SessionTerminationReason>) {
        let now = chrono::Utc::now().timestamp();

        let Some(id) = cookie_id else {
            return (self.fresh(now), None);
        };

        let Some(mut data) = self.store.load(id) else {
            return (self.fresh(now), None);
        };

        let idle = now.saturating_sub(data.last_activity);
        if idle > self.policy.idle_timeout.as_secs() as i64 {
            self.store.delete(id);
            security_event!(SecurityEvent::SessionTimedOut,
                session = %redact(id), idle_secs = idle);
            return (self.fresh(now), Some(SessionTerminationReason::IdleTimeout));
        }

        data.last_activity = now;

        let mut session = Session {
            id: id.to_string(),
            data,
            destroyed: false,
            stale_ids: Vec::new(),
        };

        let age = now.saturating_sub(session.data.created);
        if age > self.policy.regenerate_interval.as_secs() as i64 {
            session.regenerate();
        }

        (session, None)
    }

    fn fresh(&self, now: i64) -> Session {
        let session = Session::fresh(now);
        security_event!(SecurityEvent::SessionCreated, session = %redact(&session.id));
        session
    }

    /// Persist the session, invalidating superseded and destroyed IDs.
    pub fn save(&self, session: &mut Session) {
        for stale in session.stale_ids.drain(..) {
            self.store.delete(&stale);
        }
        if session.destroyed {
            self.store.delete(&session.id);
        } else {
            self.store.save(&session.id, &session.data);
        }
    }

    /// `Set-Cookie` value for a live session
    pub fn cookie_header(&self, session: &Session) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict",
            self.policy.cookie_name,
            session.id()
        );
        if self.policy.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value that clears the session cookie
    pub fn clear_cookie_header(&self) -> String {
        let mut cookie = format!(
            "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Strict",
            self.policy.cookie_name
        );
        if self.policy.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

// ============================================================================
// Tests
// ============================================================================
