//! Client-side session lifecycle.
//!
//! [`SessionManager`] owns a bearer [`Credential`] and its expiry, renews it
//! proactively through a [`SessionBackend`] once it enters the renewal
//! window, and signs the user out when renewal or verification fails.
//!
//! ```text
//! Absent --store--> Valid --(window)--> NearExpiry --(expiry)--> Expired --> Absent
//!                     ^                     |
//!                     +------renewed--------+  (failure: Absent + sign-out)
//! ```
//!
//! All checks go through one state machine: callers use
//! [`SessionManager::ensure_fresh`] before a request and
//! [`SessionManager::spawn_watchdog`] drives the periodic check.

pub mod http;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::utils::toml_config::SessionSettings;

pub use http::HttpSessionBackend;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

/// A bearer token and the instant it stops being usable.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Valid,
    NearExpiry,
    Expired,
}

/// Why the session was ended without the user asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    RenewalFailed,
    VerificationFailed,
    Expired,
}

/// Failure reported by a [`SessionBackend`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// The server refused the credential. Never retried.
    #[error("credential rejected: {0}")]
    Rejected(String),

    /// Network trouble or a server-side error that may go away.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The server answered but the payload is unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RefreshError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RefreshError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no credential stored")]
    NoCredential,

    #[error("credential expired")]
    Expired,

    #[error("credential renewal failed: {0}")]
    RenewalFailed(String),

    #[error("credential verification failed: {0}")]
    VerificationFailed(String),

    #[error("credential storage error: {0}")]
    Storage(String),
}

/// Issues renewed credentials and checks existing ones.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Exchange a still-valid token for a fresh one
    async fn refresh(&self, token: &str) -> Result<String, RefreshError>;

    /// Confirm the token is still accepted (not revoked, user still exists)
    async fn verify(&self, token: &str) -> Result<(), RefreshError>;
}

/// Receives forced sign-outs, e.g. to send the user back to the login screen.
pub trait SignOutHandler: Send + Sync {
    fn signed_out(&self, reason: SignOutReason);
}

impl<F> SignOutHandler for F
where
    F: Fn(SignOutReason) + Send + Sync,
{
    fn signed_out(&self, reason: SignOutReason) {
        self(reason)
    }
}

/// Default handler: only records the sign-out in the log.
#[derive(Debug, Default)]
pub struct LogSignOut;

impl SignOutHandler for LogSignOut {
    fn signed_out(&self, reason: SignOutReason) {
        tracing::warn!(?reason, "Session signed out");
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_saturating(*now, by);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// How renewal failures are handled. The default makes every failure fatal.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    /// Total refresh attempts, including the first
    pub max_attempts: u32,
    /// Retry [`RefreshError::Transient`] failures while attempts remain
    pub retry_transient: bool,
    /// Upper bound for a single refresh call
    pub timeout: Duration,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_transient: false,
            timeout: Duration::from_secs(10),
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime assigned on store; kept below the server's signing TTL
    pub ttl: Duration,
    pub renewal_window: Duration,
    pub check_interval: Duration,
    pub renewal: RenewalPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(55 * 60),
            renewal_window: Duration::from_secs(5 * 60),
            check_interval: Duration::from_secs(5 * 60),
            renewal: RenewalPolicy::default(),
        }
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            ttl: Duration::from_secs(settings.ttl_secs),
            renewal_window: Duration::from_secs(settings.renewal_window_secs),
            check_interval: Duration::from_secs(settings.check_interval_secs.max(1)),
            renewal: RenewalPolicy {
                max_attempts: settings.max_renewal_attempts.max(1),
                retry_transient: settings.retry_transient,
                timeout: Duration::from_secs(settings.renewal_timeout_secs.max(1)),
                backoff: Duration::from_millis(settings.retry_backoff_ms),
            },
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

fn add_saturating(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    instant
        .checked_add_signed(to_chrono(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct SessionManager {
    backend: Arc<dyn SessionBackend>,
    store: Arc<dyn CredentialStore>,
    on_sign_out: Arc<dyn SignOutHandler>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    renewal_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn SessionBackend>, config: SessionConfig) -> Self {
        Self {
            backend,
            store: Arc::new(MemoryCredentialStore::new()),
            on_sign_out: Arc::new(LogSignOut),
            clock: Arc::new(SystemClock),
            config,
            renewal_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sign_out(mut self, handler: Arc<dyn SignOutHandler>) -> Self {
        self.on_sign_out = handler;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Store a freshly issued token with the configured TTL.
    pub fn store(&self, token: impl Into<String>) -> Result<Credential, SessionError> {
        self.store_with_ttl(token, self.config.ttl)
    }

    pub fn store_with_ttl(
        &self,
        token: impl Into<String>,
        ttl: Duration,
    ) -> Result<Credential, SessionError> {
        let credential = Credential {
            token: token.into(),
            expires_at: add_saturating(self.clock.now(), ttl),
        };
        self.store.save(&credential)?;
        tracing::debug!(expires_at = %credential.expires_at, "Stored session credential");
        Ok(credential)
    }

    /// Current state. An expired credential is removed as a side effect.
    pub fn check_status(&self) -> Result<SessionState, SessionError> {
        let credential = self.store.load()?;
        let state = self.classify(credential.as_ref());
        if state == SessionState::Expired {
            self.store.clear()?;
            tracing::info!("Session credential expired");
        }
        Ok(state)
    }

    /// The stored token, if it has not expired yet.
    pub fn token(&self) -> Result<Option<String>, SessionError> {
        let credential = self.store.load()?;
        match self.classify(credential.as_ref()) {
            SessionState::Valid | SessionState::NearExpiry => Ok(credential.map(|c| c.token)),
            SessionState::Expired => {
                self.store.clear()?;
                Ok(None)
            }
            SessionState::Absent => Ok(None),
        }
    }

    /// Return a token that is outside the renewal window, renewing if needed.
    ///
    /// Renewal runs in a critical section: a concurrent caller waits for the
    /// renewal in flight and then re-reads the state, so it sees the renewed
    /// credential (or the signed-out session) instead of renewing again.
    pub async fn ensure_fresh(&self) -> Result<String, SessionError> {
        if let Some(credential) = self.store.load()? {
            if self.classify(Some(&credential)) == SessionState::Valid {
                return Ok(credential.token);
            }
        }

        let _guard = self.renewal_lock.lock().await;

        let credential = self.store.load()?;
        match (self.classify(credential.as_ref()), credential) {
            (SessionState::Valid, Some(credential)) => Ok(credential.token),
            (SessionState::NearExpiry, Some(credential)) => self.renew(&credential.token).await,
            (SessionState::Expired, _) => {
                self.sign_out(SignOutReason::Expired);
                Err(SessionError::Expired)
            }
            _ => Err(SessionError::NoCredential),
        }
    }

    /// Explicit logout. No sign-out notification is sent.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.store.clear()
    }

    /// Treat a failed verification like a failed renewal.
    pub fn report_verification_failure(&self, reason: impl Into<String>) -> SessionError {
        let reason = reason.into();
        tracing::warn!(%reason, "Session verification failed");
        self.sign_out(SignOutReason::VerificationFailed);
        SessionError::VerificationFailed(reason)
    }

    /// One periodic check: verify the credential with the backend, then renew
    /// it if it entered the renewal window.
    pub async fn check_in(&self) -> Result<SessionState, SessionError> {
        let credential = self.store.load()?;
        let token = match (self.classify(credential.as_ref()), credential) {
            (SessionState::Expired, _) => {
                self.sign_out(SignOutReason::Expired);
                return Err(SessionError::Expired);
            }
            (SessionState::Valid | SessionState::NearExpiry, Some(credential)) => credential.token,
            _ => return Ok(SessionState::Absent),
        };

        match self.backend.verify(&token).await {
            Ok(()) => {}
            Err(RefreshError::Transient(e)) => {
                // Verification is repeated on the next tick
                tracing::warn!(error = %e, "Session verification unavailable");
            }
            Err(e) => return Err(self.report_verification_failure(e.to_string())),
        }

        if self.check_status()? == SessionState::NearExpiry {
            self.ensure_fresh().await?;
        }
        self.check_status()
    }

    /// Run [`check_in`](Self::check_in) every `check_interval` until aborted.
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        // tokio::time::interval panics on a zero period
        let period = manager.config.check_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                match manager.check_in().await {
                    Ok(state) => tracing::debug!(?state, "Session check"),
                    Err(SessionError::Storage(e)) => {
                        tracing::error!(error = %e, "Session check could not access storage")
                    }
                    Err(e) => tracing::info!(error = %e, "Session check ended the session"),
                }
            }
        })
    }

    fn classify(&self, credential: Option<&Credential>) -> SessionState {
        let Some(credential) = credential else {
            return SessionState::Absent;
        };

        let now = self.clock.now();
        if now >= credential.expires_at {
            SessionState::Expired
        } else if credential.expires_at - now < to_chrono(self.config.renewal_window) {
            SessionState::NearExpiry
        } else {
            SessionState::Valid
        }
    }

    async fn renew(&self, token: &str) -> Result<String, SessionError> {
        let policy = &self.config.renewal;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        let failure = loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(policy.timeout, self.backend.refresh(token)).await {
                Ok(result) => result,
                Err(_) => Err(RefreshError::Transient(format!(
                    "refresh timed out after {:?}",
                    policy.timeout
                ))),
            };

            match outcome {
                Ok(new_token) if !new_token.trim().is_empty() => {
                    self.store(new_token.clone())?;
                    tracing::info!(attempt, "Session credential renewed");
                    return Ok(new_token);
                }
                Ok(_) => break RefreshError::InvalidResponse("empty token".to_string()),
                Err(e) if e.is_transient() && policy.retry_transient && attempt < max_attempts => {
                    tracing::warn!(attempt, error = %e, "Renewal failed, retrying");
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(e) => break e,
            }
        };

        tracing::warn!(attempt, error = %failure, "Session renewal failed");
        self.sign_out(SignOutReason::RenewalFailed);
        Err(SessionError::RenewalFailed(failure.to_string()))
    }

    /// End the session: clear the credential and notify the sign-out handler.
    pub fn sign_out(&self, reason: SignOutReason) {
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to clear credential during sign-out");
        }
        self.on_sign_out.signed_out(reason);
    }
}
