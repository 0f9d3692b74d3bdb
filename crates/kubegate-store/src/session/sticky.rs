//! Sticky session storage.
//!
//! Pass-through over the in-memory backend, used when front-end routing
//! guarantees session affinity: every request for a session lands on the
//! instance that created it, so local memory is sufficient.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{InMemorySessionStore, SessionData, SessionStore};

pub struct StickySessionStore {
    inner: InMemorySessionStore,
}

impl StickySessionStore {
    pub fn new(ttl_seconds: u64, cleanup_interval_seconds: u64) -> Self {
        Self {
            inner: InMemorySessionStore::new(ttl_seconds, cleanup_interval_seconds),
        }
    }
}

#[async_trait]
impl SessionStore for StickySessionStore {
    async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    async fn stop(&self) {
        self.inner.stop().await;
    }

    async fn create(
        &self,
        session_id: &str,
        client_info: Map<String, Value>,
    ) -> Result<SessionData> {
        self.inner.create(session_id, client_info).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionData>> {
        self.inner.get(session_id).await
    }

    async fn update(&self, session_id: &str, patch: Map<String, Value>) -> Result<bool> {
        self.inner.update(session_id, patch).await
    }

    async fn touch(&self, session_id: &str) -> Result<bool> {
        self.inner.touch(session_id).await
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        self.inner.delete(session_id).await
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        self.inner.cleanup_expired().await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sticky_delegates() {
        let store = StickySessionStore::new(3600, 300);
        store.create("s1", Map::new()).await.unwrap();
        assert!(store.get("s1").await.unwrap().is_some());
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.delete("s1").await.unwrap());
    }
}
