use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{SessionError, SessionId, SessionStore};

/// Redis-backed session store. Entries live at `{namespace}:{session}:{key}`.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    namespace: String,
    ttl: Option<Duration>,
}

impl RedisSessionStore {
    pub async fn connect(
        redis_url: &str,
        namespace: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Result<Self, SessionError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
            ttl,
        })
    }

    fn entry_key(&self, session: &SessionId, key: &str) -> String {
        entry_key(&self.namespace, session, key)
    }
}

fn entry_key(namespace: &str, session: &SessionId, key: &str) -> String {
    format!("{}:{}:{}", namespace, session.as_str(), key)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session: &SessionId, key: &str) -> Result<Option<Value>, SessionError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.entry_key(session, key)).await?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(SessionError::from)
    }

    async fn set(&self, session: &SessionId, key: &str, value: Value) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let entry_key = self.entry_key(session, key);
        let payload = serde_json::to_string(&value)?;
        match self.ttl {
            Some(ttl) if ttl.as_secs() > 0 => {
                conn.set_ex::<_, _, ()>(entry_key, payload, ttl.as_secs() as usize)
                    .await?
            }
            _ => conn.set::<_, _, ()>(entry_key, payload).await?,
        }
        Ok(())
    }

    async fn remove(&self, session: &SessionId, key: &str) -> Result<Option<Value>, SessionError> {
        let mut conn = self.conn.clone();
        let entry_key = self.entry_key(session, key);
        // GET and DEL in one MULTI so a concurrent SET is never dropped unseen
        let (previous,): (Option<String>,) = redis::pipe()
            .atomic()
            .get(&entry_key)
            .del(&entry_key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        if previous.is_some() {
            debug!(session = %session, key, "Removed session entry");
        }
        previous
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(SessionError::from)
    }
}
