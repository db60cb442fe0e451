use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::{SessionError, SessionId, SessionStore};

/// Process-local session store; sessions are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, HashMap<String, Value>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session: &SessionId, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self
            .sessions
            .get(session.as_str())
            .and_then(|entries| entries.get(key).cloned()))
    }

    async fn set(&self, session: &SessionId, key: &str, value: Value) -> Result<(), SessionError> {
        self.sessions
            .entry(session.as_str().to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, session: &SessionId, key: &str) -> Result<Option<Value>, SessionError> {
        let removed = match self.sessions.get_mut(session.as_str()) {
            Some(mut entries) => entries.remove(key),
            None => return Ok(None),
        };
        self.sessions
            .remove_if(session.as_str(), |_, entries| entries.is_empty());
        Ok(removed)
    }
}
