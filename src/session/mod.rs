//! Session state: ordered message log plus profile hints
//!
//! Stores only promise session-scoped atomicity. Ordering across
//! concurrent requests for one session is the job of [`SessionLocks`],
//! which the orchestrator holds for the whole request.

pub mod postgres;

use crate::error::SessionError;
use crate::models::{InvestmentResponse, ProfileHints};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

pub use postgres::PostgresSessionStore;

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MessageContent {
    Text(String),
    Response(InvestmentResponse),
}

/// Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(response: InvestmentResponse) -> Self {
        Self {
            role: Role::Agent,
            content: MessageContent::Response(response),
            timestamp: Utc::now(),
        }
    }

    /// Prose of the message, the explanation for structured responses.
    pub fn text(&self) -> &str {
        match &self.content {
            MessageContent::Text(text) => text,
            MessageContent::Response(response) => &response.explanation,
        }
    }
}

//
// ================= Session =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    messages: VecDeque<Message>,
    pub profile: Option<ProfileHints>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: VecDeque::new(),
            profile: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append and evict the oldest messages beyond `limit`.
    pub fn push(&mut self, message: Message, limit: usize) {
        self.messages.push_back(message);
        while self.messages.len() > limit.max(1) {
            self.messages.pop_front();
        }
        self.updated_at = Utc::now();
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// The `count` most recent messages, oldest first.
    pub fn recent(&self, count: usize) -> Vec<&Message> {
        let skip = self.messages.len().saturating_sub(count);
        self.messages.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

//
// ================= Store contract =================
//

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError>;

    /// Persist an empty session if none exists under this id.
    async fn create(&self, session_id: &str) -> Result<(), SessionError>;

    /// Append a question and its answer as one unit, creating the session
    /// when absent. Either both messages are stored or neither is.
    async fn append_turn(&self, session_id: &str, user: Message, agent: Message) -> Result<(), SessionError>;

    async fn save_profile(&self, session_id: &str, profile: &ProfileHints) -> Result<(), SessionError>;

    /// Remove the session. Removing an unknown session is a no-op.
    async fn clear(&self, session_id: &str) -> Result<(), SessionError>;
}

/// Process-local store. Each session has its own lock so writers to
/// different sessions never contend.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<RwLock<Session>>>>,
    history_limit: usize,
}

impl InMemorySessionStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    async fn entry(&self, session_id: &str) -> Arc<RwLock<Session>> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Session::new(session_id))))
            .clone()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let session = self.sessions.read().await.get(session_id).cloned();
        match session {
            Some(session) => Ok(Some(session.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn create(&self, session_id: &str) -> Result<(), SessionError> {
        self.entry(session_id).await;
        Ok(())
    }

    async fn append_turn(&self, session_id: &str, user: Message, agent: Message) -> Result<(), SessionError> {
        let session = self.entry(session_id).await;
        let mut session = session.write().await;
        session.push(user, self.history_limit);
        session.push(agent, self.history_limit);
        Ok(())
    }

    async fn save_profile(&self, session_id: &str, profile: &ProfileHints) -> Result<(), SessionError> {
        let session = self.entry(session_id).await;
        let mut session = session.write().await;
        session.profile = Some(profile.clone());
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), SessionError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

//
// ================= Session-level mutual exclusion =================
//

/// One FIFO-fair async mutex per session id. Holding the guard serializes
/// every read-modify-append cycle for that session in arrival order.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(session_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry when no request holds or awaits it.
    pub async fn release_idle(&self, session_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks.get(session_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(session_id);
        }
    }
}
