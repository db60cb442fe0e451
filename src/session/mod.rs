//! Server-side session storage and the guest cart kept in it.
//!
//! Sessions are addressed explicitly by [`SessionId`]; nothing here is ambient
//! global state. Values are JSON so the backends stay schema-agnostic.

mod guest_cart;
mod memory;
mod redis_store;

pub use guest_cart::{GuestCart, GUEST_CART_KEY};
pub use memory::InMemorySessionStore;
pub use redis_store::RedisSessionStore;

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde_json::Value;
use std::fmt;

use crate::errors::ServiceError;

/// Header carrying the caller's session identifier
pub const SESSION_HEADER: &str = "x-session-id";

const MAX_SESSION_ID_LEN: usize = 128;

/// Opaque session identifier supplied by the client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Accepts non-empty visible ASCII up to 128 characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= MAX_SESSION_ID_LEN
            && trimmed.chars().all(|c| c.is_ascii_graphic());
        valid.then(|| SessionId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(SESSION_HEADER)
            .ok_or_else(|| ServiceError::BadRequest(format!("missing {} header", SESSION_HEADER)))?;
        raw.to_str()
            .ok()
            .and_then(SessionId::parse)
            .ok_or_else(|| ServiceError::BadRequest(format!("invalid {} header", SESSION_HEADER)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        ServiceError::SessionError(err.to_string())
    }
}

/// Key-value storage scoped per session
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session: &SessionId, key: &str) -> Result<Option<Value>, SessionError>;

    async fn set(&self, session: &SessionId, key: &str, value: Value) -> Result<(), SessionError>;

    /// Removes the key, returning the previous value.
    async fn remove(&self, session: &SessionId, key: &str) -> Result<Option<Value>, SessionError>;
}
