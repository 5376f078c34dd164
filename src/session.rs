use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use ulid::Ulid;

use crate::model::UserId;
use crate::workflow::Stage;

/// Opaque session handle carried in the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Ulid);

impl SessionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

#[derive(Debug, Clone)]
struct SessionState {
    stage: Stage,
    flash: Option<String>,
    error: Option<String>,
    user_id: Option<UserId>,
    touched_at: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            stage: Stage::Searching,
            flash: None,
            error: None,
            user_id: None,
            touched_at: Instant::now(),
        }
    }
}

/// Server-side session state keyed by [`SessionId`].
///
/// Holds the guest's place in the reservation workflow, one-shot flash and
/// error messages, and the signed-in staff user. Typed accessors only; there
/// is no string-keyed bag.
pub struct SessionStore {
    sessions: DashMap<SessionId, SessionState>,
    lifetime: Duration,
}

impl SessionStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            lifetime,
        }
    }

    /// Resume `id` if it is live, otherwise start a fresh session.
    pub fn resume_or_create(&self, id: Option<SessionId>) -> SessionId {
        if let Some(id) = id
            && let Some(mut state) = self.sessions.get_mut(&id)
            && state.touched_at.elapsed() < self.lifetime
        {
            state.touched_at = Instant::now();
            return id;
        }
        if let Some(id) = id {
            self.sessions.remove(&id);
        }
        let id = SessionId::new();
        self.sessions.insert(id, SessionState::new());
        id
    }

    fn with_state<T>(&self, id: SessionId, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self.sessions.entry(id).or_insert_with(SessionState::new);
        state.touched_at = Instant::now();
        f(&mut state)
    }

    pub fn stage(&self, id: SessionId) -> Stage {
        self.sessions
            .get(&id)
            .map(|s| s.stage.clone())
            .unwrap_or(Stage::Searching)
    }

    pub fn set_stage(&self, id: SessionId, stage: Stage) {
        self.with_state(id, |s| s.stage = stage);
    }

    /// Swap the stage out, leaving `Searching` behind.
    pub fn take_stage(&self, id: SessionId) -> Stage {
        self.with_state(id, |s| std::mem::replace(&mut s.stage, Stage::Searching))
    }

    pub fn put_flash(&self, id: SessionId, msg: impl Into<String>) {
        self.with_state(id, |s| s.flash = Some(msg.into()));
    }

    pub fn take_flash(&self, id: SessionId) -> Option<String> {
        self.sessions.get_mut(&id).and_then(|mut s| s.flash.take())
    }

    pub fn put_error(&self, id: SessionId, msg: impl Into<String>) {
        self.with_state(id, |s| s.error = Some(msg.into()));
    }

    pub fn take_error(&self, id: SessionId) -> Option<String> {
        self.sessions.get_mut(&id).and_then(|mut s| s.error.take())
    }

    pub fn user(&self, id: SessionId) -> Option<UserId> {
        self.sessions.get(&id).and_then(|s| s.user_id)
    }

    /// Move the state to a new id and attach the user. Called on login so a
    /// pre-login session id never carries a staff identity.
    pub fn renew_with_user(&self, id: SessionId, user_id: UserId) -> SessionId {
        let mut state = self
            .sessions
            .remove(&id)
            .map(|(_, s)| s)
            .unwrap_or_else(SessionState::new);
        state.user_id = Some(user_id);
        state.touched_at = Instant::now();
        let renewed = SessionId::new();
        self.sessions.insert(renewed, state);
        renewed
    }

    pub fn remove(&self, id: SessionId) {
        self.sessions.remove(&id);
    }

    /// Drop sessions idle for longer than the lifetime. Returns how many.
    pub fn reap_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.touched_at.elapsed() < self.lifetime);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
