//! Per-user conversation sessions.
//!
//! The store is created once at startup and lives for the whole process.
//! Nothing is persisted: a restart starts every user from scratch.
//!
//! Each session sits behind its own async mutex. The engine holds that lock
//! for a full turn, so two turns from the same user never interleave their
//! appends while turns from different users run side by side.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::chatbot::message::{Message, Role};

pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Freshly created or reset, no user message yet.
    Seeded,
    /// At least one user turn.
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    NotFound(i64),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(user_id) => write!(f, "no session for user {user_id}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Ordered transcript for one user.
#[derive(Debug, Clone)]
pub struct Session {
    messages: Vec<Message>,
}

impl Session {
    pub fn seeded(persona_prompt: &str, greeting: &str) -> Self {
        Self {
            messages: vec![Message::system(persona_prompt), Message::assistant(greeting)],
        }
    }

    fn greeting_only(greeting: &str) -> Self {
        Self {
            messages: vec![Message::assistant(greeting)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn state(&self) -> SessionState {
        if self.messages.iter().any(|m| m.role == Role::User) {
            SessionState::Active
        } else {
            SessionState::Seeded
        }
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn reset(&mut self, greeting: &str) {
        *self = Self::greeting_only(greeting);
    }

    /// Rewrite the leading system prompt in place.
    ///
    /// A session that no longer starts with a system message (after a reset)
    /// is left alone; the window still gets the persona from
    /// [`Session::windowed_context`].
    pub fn refresh_persona(&mut self, persona_prompt: &str) {
        if let Some(first) = self.messages.first_mut()
            && first.role == Role::System
            && first.content != persona_prompt
        {
            first.content = persona_prompt.to_string();
        }
    }

    /// The last `window_size` messages with element 0 forced to the live
    /// persona prompt. Never mutates the stored transcript.
    pub fn windowed_context(&self, persona_prompt: &str, window_size: usize) -> Vec<Message> {
        let size = window_size.max(1);
        let start = self.messages.len().saturating_sub(size);
        let mut window = self.messages[start..].to_vec();

        match window.first_mut() {
            Some(first) => *first = Message::system(persona_prompt),
            None => window.push(Message::system(persona_prompt)),
        }
        window
    }
}

/// All live sessions, keyed by user id.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<i64, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn handle(&self, user_id: i64) -> Option<SessionHandle> {
        self.sessions.lock().await.get(&user_id).cloned()
    }

    /// Existing session for `user_id`, or a new one seeded with the persona
    /// and greeting. Existing sessions are returned untouched.
    pub async fn get_or_create(&self, user_id: i64, persona_prompt: &str, greeting: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(user_id)
            .or_insert_with(|| {
                debug!("New session for user {}", user_id);
                Arc::new(Mutex::new(Session::seeded(persona_prompt, greeting)))
            })
            .clone()
    }

    pub async fn append(&self, user_id: i64, role: Role, content: impl Into<String>) -> Result<(), SessionError> {
        let content: String = content.into();
        let handle = self.handle(user_id).await.ok_or(SessionError::NotFound(user_id))?;
        handle.lock().await.append(role, content);
        Ok(())
    }

    /// Replace the session with a lone greeting. Creates it if missing.
    pub async fn reset(&self, user_id: i64, greeting: &str) -> SessionHandle {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(Session::greeting_only(greeting))))
                .clone()
        };
        handle.lock().await.reset(greeting);
        handle
    }

    pub async fn windowed_context(
        &self,
        user_id: i64,
        persona_prompt: &str,
        window_size: usize,
    ) -> Result<Vec<Message>, SessionError> {
        let handle = self.handle(user_id).await.ok_or(SessionError::NotFound(user_id))?;
        let session = handle.lock().await;
        Ok(session.windowed_context(persona_prompt, window_size))
    }

    /// Copy of a user's transcript.
    pub async fn snapshot(&self, user_id: i64) -> Option<Vec<Message>> {
        let handle = self.handle(user_id).await?;
        let session = handle.lock().await;
        Some(session.messages().to_vec())
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_session() {
        let session = Session::seeded("persona", "hello");
        assert_eq!(session.messages(), &[Message::system("persona"), Message::assistant("hello")]);
        assert_eq!(session.state(), SessionState::Seeded);
    }

    #[test]
    fn test_state_becomes_active() {
        let mut session = Session::seeded("persona", "hello");
        session.append(Role::User, "hi");
        assert_eq!(session.state(), SessionState::Active);
        session.reset("hello");
        assert_eq!(session.state(), SessionState::Seeded);
        assert_eq!(session.messages(), &[Message::assistant("hello")]);
    }

    #[test]
    fn test_window_forces_persona_at_head() {
        let mut session = Session::seeded("old persona", "hello");
        session.append(Role::User, "hi");
        session.append(Role::Assistant, "yo");

        let window = session.windowed_context("new persona", 4);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0], Message::system("new persona"));
        assert_eq!(window[3], Message::assistant("yo"));
        // stored transcript is untouched
        assert_eq!(session.messages()[0].content, "old persona");
    }

    #[test]
    fn test_window_truncates_and_overwrites_oldest() {
        let mut session = Session::seeded("p", "hello");
        for i in 0..5 {
            session.append(Role::User, format!("u{i}"));
            session.append(Role::Assistant, format!("a{i}"));
        }

        let window = session.windowed_context("p", 4);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0], Message::system("p"));
        assert_eq!(window[1], Message::assistant("a3"));
        assert_eq!(window[2], Message::user("u4"));
        assert_eq!(window[3], Message::assistant("a4"));
    }

    #[test]
    fn test_window_shorter_than_size() {
        let session = Session::seeded("p", "hello");
        let window = session.windowed_context("p", 4);
        assert_eq!(window, vec![Message::system("p"), Message::assistant("hello")]);
    }

    #[test]
    fn test_window_after_reset_replaces_greeting() {
        let mut session = Session::seeded("p", "hello");
        session.reset("hello");
        let window = session.windowed_context("p", 4);
        assert_eq!(window, vec![Message::system("p")]);
    }

    #[test]
    fn test_window_zero_treated_as_one() {
        let session = Session::seeded("p", "hello");
        let window = session.windowed_context("p", 0);
        assert_eq!(window, vec![Message::system("p")]);
    }

    #[test]
    fn test_refresh_persona_rewrites_in_place() {
        let mut session = Session::seeded("old", "hello");
        session.refresh_persona("new");
        assert_eq!(session.len(), 2);
        assert_eq!(session.messages()[0], Message::system("new"));
    }

    #[test]
    fn test_refresh_persona_skips_reset_session() {
        let mut session = Session::seeded("old", "hello");
        session.reset("hello");
        session.refresh_persona("new");
        assert_eq!(session.messages(), &[Message::assistant("hello")]);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = SessionStore::new();
        let first = store.get_or_create(1, "p", "hello").await;
        first.lock().await.append(Role::User, "hi");

        let again = store.get_or_create(1, "other", "other greeting").await;
        let session = again.lock().await;
        assert_eq!(session.len(), 3);
        assert_eq!(session.messages()[0].content, "p");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_append_without_session_fails() {
        let store = SessionStore::new();
        let err = store.append(42, Role::User, "hi").await.unwrap_err();
        assert_eq!(err, SessionError::NotFound(42));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_append_after_create() {
        let store = SessionStore::new();
        store.get_or_create(1, "p", "hello").await;
        store.append(1, Role::User, "hi").await.unwrap();

        let messages = store.snapshot(1).await.unwrap();
        assert_eq!(messages.last(), Some(&Message::user("hi")));
    }

    #[tokio::test]
    async fn test_reset_creates_or_replaces() {
        let store = SessionStore::new();
        store.reset(7, "hello").await;
        assert_eq!(store.snapshot(7).await.unwrap(), vec![Message::assistant("hello")]);

        store.append(7, Role::User, "hi").await.unwrap();
        store.reset(7, "hello").await;
        assert_eq!(store.snapshot(7).await.unwrap(), vec![Message::assistant("hello")]);
    }

    #[tokio::test]
    async fn test_store_windowed_context() {
        let store = SessionStore::new();
        assert!(store.windowed_context(1, "p", 4).await.is_err());

        store.get_or_create(1, "stale", "hello").await;
        let window = store.windowed_context(1, "live", 4).await.unwrap();
        assert_eq!(window[0], Message::system("live"));
        assert_eq!(store.snapshot(1).await.unwrap()[0].content, "stale");
    }

    #[tokio::test]
    async fn test_sessions_are_per_user() {
        let store = SessionStore::new();
        store.get_or_create(1, "p", "hello").await;
        store.get_or_create(2, "p", "hello").await;
        store.append(1, Role::User, "only for one").await.unwrap();

        assert_eq!(store.snapshot(1).await.unwrap().len(), 3);
        assert_eq!(store.snapshot(2).await.unwrap().len(), 2);
    }
}
