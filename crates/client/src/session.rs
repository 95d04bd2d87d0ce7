//! Authentication session state consumed by the realtime layer.
//!
//! The dashboard's auth provider owns sign-in; this module only models what
//! it publishes (`credential` + `status`) and offers [`SessionStore`], a
//! watch-backed provider the CLI and tests use directly.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Bearer token issued by the auth provider.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for blank tokens.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Loading,
    Authenticated,
    Unauthenticated,
}

/// What the auth provider currently reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub credential: Option<Credential>,
    pub status: SessionStatus,
}

impl SessionSnapshot {
    pub fn loading() -> Self {
        Self {
            credential: None,
            status: SessionStatus::Loading,
        }
    }

    pub fn authenticated(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
            status: SessionStatus::Authenticated,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            credential: None,
            status: SessionStatus::Unauthenticated,
        }
    }

    /// The credential, if the session is authenticated.
    pub fn active_credential(&self) -> Option<&Credential> {
        match self.status {
            SessionStatus::Authenticated => self.credential.as_ref(),
            _ => None,
        }
    }
}

/// Session provider backed by a `tokio::sync::watch` channel.
#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<SessionSnapshot>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Starts in `Loading`, as the auth provider does before it has checked
    /// for an existing session.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::loading());
        Self { tx: Arc::new(tx) }
    }

    /// Sign in with a token. Blank tokens sign out.
    pub fn sign_in(&self, token: impl Into<String>) {
        match Credential::new(token) {
            Some(credential) => {
                tracing::info!("session authenticated");
                self.tx.send_replace(SessionSnapshot::authenticated(credential));
            }
            None => self.sign_out(),
        }
    }

    pub fn sign_out(&self) {
        tracing::info!("session signed out");
        self.tx.send_replace(SessionSnapshot::unauthenticated());
    }

    /// Sign out because the backend rejected the credential.
    pub fn force_sign_out(&self, reason: &str) {
        tracing::warn!("forcing sign-out: {}", reason);
        self.sign_out();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.tx.borrow().active_credential().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }
}
