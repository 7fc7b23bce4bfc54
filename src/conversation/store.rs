use super::types::{Message, MessageState, NewMessage, Session};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Owner of all session and message records.
///
/// Operations are synchronous and never block on I/O; callers in async code
/// hold no lock across an `.await`. Operations on an unknown session id are
/// no-ops reported through the return value, never errors.
pub trait SessionStore: Send + Sync {
    /// Return the session, creating it (with `default_name` or `"Chat N"`) when absent.
    fn get_or_create(&self, session_id: &str, default_name: Option<&str>) -> Session;

    fn get(&self, session_id: &str) -> Option<Session>;

    /// All sessions, most recently updated first.
    fn list_all(&self) -> Vec<Session>;

    /// Messages of a session in conversation order (empty when absent).
    fn messages(&self, session_id: &str) -> Vec<Message>;

    fn rename(&self, session_id: &str, name: &str) -> bool;

    /// Assign id + timestamp, append, and return the stored message.
    fn append(&self, session_id: &str, message: NewMessage) -> Option<Message>;

    /// Overwrite a message's state in place; `None` when the message is not found.
    fn replace(&self, session_id: &str, message_id: &str, state: MessageState)
    -> Option<Message>;

    /// Drop every message but keep the session.
    fn clear(&self, session_id: &str) -> bool;

    fn delete(&self, session_id: &str) -> bool;
}

struct SessionEntry {
    session: Session,
    /// Store-wide revision of the last mutation; orders sessions when
    /// timestamps collide within one clock tick.
    revision: u64,
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, SessionEntry>,
    revision: u64,
    last_touch: Option<DateTime<Utc>>,
}

impl StoreInner {
    /// Next (revision, timestamp) pair; the timestamp never moves backwards.
    fn tick(&mut self) -> (u64, DateTime<Utc>) {
        self.revision += 1;
        let now = Utc::now();
        let stamp = match self.last_touch {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_touch = Some(stamp);
        (self.revision, stamp)
    }

    fn touch(&mut self, session_id: &str) -> Option<&mut SessionEntry> {
        if !self.sessions.contains_key(session_id) {
            return None;
        }
        let (revision, stamp) = self.tick();
        let entry = self.sessions.get_mut(session_id)?;
        entry.revision = revision;
        entry.session.last_updated = stamp;
        Some(entry)
    }
}

/// Process-local session store. Bind one instance per user or connection.
#[derive(Default)]
pub struct InMemorySessionStore {
    inner: Mutex<StoreInner>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, session_id: &str, default_name: Option<&str>) -> Session {
        let mut inner = self.lock();
        if let Some(entry) = inner.sessions.get(session_id) {
            return entry.session.clone();
        }

        let name = default_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(
                || format!("Chat {}", inner.sessions.len() + 1),
                ToOwned::to_owned,
            );
        let (revision, stamp) = inner.tick();
        let session = Session {
            id: session_id.to_string(),
            name,
            messages: Vec::new(),
            last_updated: stamp,
        };
        inner.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                session: session.clone(),
                revision,
            },
        );
        tracing::debug!(session_id, name = session.name.as_str(), "Created chat session");
        session
    }

    fn get(&self, session_id: &str) -> Option<Session> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    fn list_all(&self) -> Vec<Session> {
        let inner = self.lock();
        let mut entries: Vec<&SessionEntry> = inner.sessions.values().collect();
        entries.sort_by(|a, b| {
            b.session
                .last_updated
                .cmp(&a.session.last_updated)
                .then(b.revision.cmp(&a.revision))
        });
        entries
            .into_iter()
            .map(|entry| entry.session.clone())
            .collect()
    }

    fn messages(&self, session_id: &str) -> Vec<Message> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|entry| entry.session.messages.clone())
            .unwrap_or_default()
    }

    fn rename(&self, session_id: &str, name: &str) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.touch(session_id) else {
            return false;
        };
        entry.session.name = name.to_string();
        true
    }

    fn append(&self, session_id: &str, message: NewMessage) -> Option<Message> {
        let mut inner = self.lock();
        let entry = inner.touch(session_id)?;
        let stored = Message {
            id: Uuid::new_v4().to_string(),
            role: message.role,
            state: message.state,
            timestamp: entry.session.last_updated,
        };
        entry.session.messages.push(stored.clone());
        Some(stored)
    }

    fn replace(
        &self,
        session_id: &str,
        message_id: &str,
        state: MessageState,
    ) -> Option<Message> {
        let mut inner = self.lock();
        let index = inner
            .sessions
            .get(session_id)?
            .session
            .messages
            .iter()
            .position(|message| message.id == message_id)?;
        let entry = inner.touch(session_id)?;
        let message = &mut entry.session.messages[index];
        message.state = state;
        Some(message.clone())
    }

    fn clear(&self, session_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.touch(session_id) else {
            return false;
        };
        entry.session.messages.clear();
        true
    }

    fn delete(&self, session_id: &str) -> bool {
        self.lock().sessions.remove(session_id).is_some()
    }
}
