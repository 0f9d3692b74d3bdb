//! Session storage.
//!
//! Sessions carry application state between MCP requests: client info from
//! `initialize` plus an opaque data map. A session expires once
//! `now - last_accessed` exceeds the configured TTL. An entry observed as
//! present never comes back absent without an intervening delete or expiry.

mod memory;
mod redis;
mod sticky;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use kubegate_core::config::{SessionBackend, SessionSettings};

pub use memory::InMemorySessionStore;
pub use self::redis::RedisSessionStore;
pub use sticky::StickySessionStore;

/// Data stored per session. Mutable only through a [`SessionStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Client information from the MCP initialize request.
    #[serde(default)]
    pub client_info: Map<String, Value>,
    /// Arbitrary application data.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl SessionData {
    pub fn new(session_id: impl Into<String>, client_info: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_accessed: now,
            client_info,
            data: Map::new(),
        }
    }

    pub fn is_expired(&self, ttl_seconds: u64) -> bool {
        let age = Utc::now().signed_duration_since(self.last_accessed);
        age.num_seconds() > ttl_seconds as i64
    }
}

/// Session storage backend interface.
///
/// All operations are idempotent given the same inputs; `get` implicitly
/// touches the entry. Store failures must degrade, not cascade: callers log
/// the error and proceed without shared state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Start background work (expiry sweeps, connections). Idempotent.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Stop background work. Idempotent.
    async fn stop(&self) {}

    async fn create(
        &self,
        session_id: &str,
        client_info: Map<String, Value>,
    ) -> Result<SessionData>;

    /// Fetch the session and refresh its last-access time.
    async fn get(&self, session_id: &str) -> Result<Option<SessionData>>;

    /// Merge `patch` into the session's data map.
    async fn update(&self, session_id: &str, patch: Map<String, Value>) -> Result<bool>;

    /// Refresh the last-access time only.
    async fn touch(&self, session_id: &str) -> Result<bool>;

    async fn delete(&self, session_id: &str) -> Result<bool>;

    /// Remove expired sessions, returning how many were dropped.
    async fn cleanup_expired(&self) -> Result<usize>;

    /// Number of live sessions.
    async fn count(&self) -> Result<usize>;
}

/// Build the session store selected by configuration.
pub async fn build_session_store(settings: &SessionSettings) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match settings.backend {
        SessionBackend::Memory => Arc::new(InMemorySessionStore::new(
            settings.ttl_seconds,
            settings.cleanup_interval_seconds,
        )),
        SessionBackend::Sticky => Arc::new(StickySessionStore::new(
            settings.ttl_seconds,
            settings.cleanup_interval_seconds,
        )),
        SessionBackend::Shared => {
            let url = settings
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("session.url is required for the shared backend"))?;
            Arc::new(RedisSessionStore::connect(url, settings.ttl_seconds).await?)
        }
    };
    Ok(store)
}
