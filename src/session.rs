//! Explicit session value and login/logout lifecycle.
//!
//! The session is not an ambient singleton: the registry and reconciler take
//! an `Arc<SessionHub>` at construction and observe login/logout as explicit
//! transitions (teardown-all vs. rebuild) rather than scattered side effects.

use parking_lot::Mutex;

use crate::emitter::{EventEmitter, SubscriptionId};

/// An authenticated session as issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

/// Lifecycle transitions published by [`SessionHub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn(Session),
    LoggedOut,
}

/// Holds the current session and publishes lifecycle transitions.
pub struct SessionHub {
    current: Mutex<Option<Session>>,
    emitter: EventEmitter<SessionEvent>,
}

impl SessionHub {
    /// Start with no session (unauthenticated).
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            emitter: EventEmitter::new(),
        }
    }

    /// Start with an existing session (e.g. restored from storage).
    pub fn with_session(session: Session) -> Self {
        Self {
            current: Mutex::new(Some(session)),
            emitter: EventEmitter::new(),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.current.lock().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Install `session` and publish `LoggedIn`.
    pub fn login(&self, session: Session) {
        *self.current.lock() = Some(session.clone());
        self.emitter.emit(&SessionEvent::LoggedIn(session));
    }

    /// Drop the current session and publish `LoggedOut`. No-op when already
    /// logged out.
    pub fn logout(&self) {
        let had_session = self.current.lock().take().is_some();
        if had_session {
            self.emitter.emit(&SessionEvent::LoggedOut);
        }
    }

    /// Observe lifecycle transitions.
    pub fn subscribe(
        &self,
        callback: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.emitter.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.emitter.unsubscribe(id);
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}
