//! The authenticated session and where it is kept.
use crate::core::error::AuthError;
use crate::core::model::{Record, User};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Record<User>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Builds a session from a login response that reports its lifetime in
    /// seconds.
    pub fn new(
        access_token: impl Into<String>,
        token_type: Option<String>,
        expires_in: Option<i64>,
        user: Record<User>,
    ) -> Self {
        Session {
            access_token: access_token.into(),
            token_type: token_type.unwrap_or_else(default_token_type),
            expires_at: expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            user,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Persistence for the current session. Implementations only store and
/// return what they are given; expiry is checked by [`Credentials`].
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Holds the process-wide session.
///
/// Readers take a cheap `Arc` snapshot or subscribe to changes. Only the
/// gateway's login and logout paths (and its handling of rejected
/// credentials) replace the value, always as a whole.
pub struct Credentials {
    store: Arc<dyn CredentialStore>,
    current: watch::Sender<Option<Arc<Session>>>,
}

impl Credentials {
    /// Starts from whatever session the store still holds.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let initial = match store.load() {
            Ok(session) => session.map(Arc::new),
            Err(e) => {
                warn!("Could not load saved session: {e:#}");
                None
            }
        };
        debug!("Restored session: {}", initial.is_some());
        let (current, _) = watch::channel(initial);
        Credentials { store, current }
    }

    /// The session to sign requests with.
    pub fn session(&self) -> Result<Arc<Session>, AuthError> {
        let session = self.current().ok_or(AuthError::NotLoggedIn)?;
        if session.is_expired() {
            debug!("Held session for {} has expired", session.user.data.email);
            self.clear();
            return Err(AuthError::Expired);
        }
        Ok(session)
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.borrow().clone()
    }

    /// Notifies on every login, logout and invalidation.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Session>>> {
        self.current.subscribe()
    }

    pub(crate) fn set(&self, session: Session) {
        if let Err(e) = self.store.save(&session) {
            warn!("Could not persist session: {e:#}");
        }
        self.current.send_replace(Some(Arc::new(session)));
    }

    pub(crate) fn clear(&self) {
        if let Err(e) = self.store.clear() {
            warn!("Could not remove saved session: {e:#}");
        }
        if self.current.send_replace(None).is_some() {
            debug!("Session cleared");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::memory::MemoryCredentialStore;

    pub(crate) fn demo_session(expires_in: Option<i64>) -> Session {
        Session::new(
            "token-abc",
            None,
            expires_in,
            Record {
                id: "user_12345".to_string(),
                owner_id: None,
                created_at: Utc::now(),
                updated_at: None,
                data: User {
                    email: "demo@example.com".to_string(),
                    first_name: "Demo".to_string(),
                    last_name: "User".to_string(),
                    role: "investor".to_string(),
                },
            },
        )
    }

    #[test]
    fn test_set_and_clear_notify_subscribers() {
        let credentials = Credentials::new(Arc::new(MemoryCredentialStore::default()));
        let mut rx = credentials.subscribe();
        assert!(credentials.current().is_none());

        credentials.set(demo_session(Some(3600)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().as_ref().unwrap().access_token,
            "token-abc"
        );

        credentials.clear();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_none());
    }

    #[test]
    fn test_session_requires_login() {
        let credentials = Credentials::new(Arc::new(MemoryCredentialStore::default()));
        assert_eq!(credentials.session().unwrap_err(), AuthError::NotLoggedIn);
    }

    #[test]
    fn test_expired_session_is_dropped() {
        let store = Arc::new(MemoryCredentialStore::default());
        let credentials = Credentials::new(store.clone());
        credentials.set(demo_session(Some(-5)));

        assert_eq!(credentials.session().unwrap_err(), AuthError::Expired);
        assert!(credentials.current().is_none());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_restores_saved_session() {
        let store = Arc::new(MemoryCredentialStore::default());
        store.save(&demo_session(None)).unwrap();

        let credentials = Credentials::new(store);
        let session = credentials.session().unwrap();
        assert_eq!(session.user_id(), "user_12345");
        assert_eq!(session.token_type, "bearer");
    }
}
