//! In-memory session storage.
//!
//! Sessions live in a concurrent map with per-entry locking, so operations
//! on different sessions never serialize on a shared lock. A background
//! sweep task removes expired entries. Suitable for single-instance
//! deployments and tests; sessions are lost on restart.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{SessionData, SessionStore};

pub struct InMemorySessionStore {
    /// Per-session state with fine-grained locking.
    sessions: Arc<DashMap<String, RwLock<SessionData>>>,
    ttl_seconds: u64,
    cleanup_interval: Duration,
    cancel: Mutex<Option<CancellationToken>>,
}

impl InMemorySessionStore {
    pub fn new(ttl_seconds: u64, cleanup_interval_seconds: u64) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl_seconds,
            cleanup_interval: Duration::from_secs(cleanup_interval_seconds.max(1)),
            cancel: Mutex::new(None),
        }
    }

    /// Drop every expired entry. Keys are collected first; entry guards must
    /// not be held across the removals.
    async fn sweep(sessions: &DashMap<String, RwLock<SessionData>>, ttl_seconds: u64) -> usize {
        let mut expired_keys = Vec::new();
        for entry in sessions.iter() {
            let state = entry.value().read().await;
            if state.is_expired(ttl_seconds) {
                expired_keys.push(entry.key().clone());
            }
        }

        let mut removed = 0;
        for key in expired_keys {
            if sessions.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn start(&self) -> Result<()> {
        let mut guard = self.cancel.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let sessions = self.sessions.clone();
        let ttl = self.ttl_seconds;
        let interval = self.cleanup_interval;
        let child = token.child_token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let removed = Self::sweep(&sessions, ttl).await;
                        if removed > 0 {
                            debug!(removed, "session sweep removed expired sessions");
                        }
                    }
                }
            }
        });

        *guard = Some(token);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
        }
    }

    async fn create(
        &self,
        session_id: &str,
        client_info: Map<String, Value>,
    ) -> Result<SessionData> {
        let session = SessionData::new(session_id, client_info);
        self.sessions
            .insert(session_id.to_string(), RwLock::new(session.clone()));
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionData>> {
        match self.sessions.get(session_id) {
            None => return Ok(None),
            Some(entry) => {
                let mut state = entry.value().write().await;
                if !state.is_expired(self.ttl_seconds) {
                    state.last_accessed = chrono::Utc::now();
                    return Ok(Some(state.clone()));
                }
            }
        }

        // Expired; the entry guard is released before removal
        self.sessions.remove(session_id);
        Ok(None)
    }

    async fn update(&self, session_id: &str, patch: Map<String, Value>) -> Result<bool> {
        match self.sessions.get(session_id) {
            None => return Ok(false),
            Some(entry) => {
                let mut state = entry.value().write().await;
                if !state.is_expired(self.ttl_seconds) {
                    state.data.extend(patch);
                    state.last_accessed = chrono::Utc::now();
                    return Ok(true);
                }
            }
        }

        self.sessions.remove(session_id);
        Ok(false)
    }

    async fn touch(&self, session_id: &str) -> Result<bool> {
        match self.sessions.get(session_id) {
            None => return Ok(false),
            Some(entry) => {
                let mut state = entry.value().write().await;
                if !state.is_expired(self.ttl_seconds) {
                    state.last_accessed = chrono::Utc::now();
                    return Ok(true);
                }
            }
        }

        self.sessions.remove(session_id);
        Ok(false)
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        Ok(Self::sweep(&self.sessions, self.ttl_seconds).await)
    }

    async fn count(&self) -> Result<usize> {
        let mut live = 0;
        for entry in self.sessions.iter() {
            let state = entry.value().read().await;
            if !state.is_expired(self.ttl_seconds) {
                live += 1;
            }
        }
        Ok(live)
    }
}

impl Drop for InMemorySessionStore {
    fn drop(&mut self) {
        // Best-effort cancel if stop() was never called
        if let Ok(mut guard) = self.cancel.try_lock() {
            if let Some(token) = guard.take() {
                token.cancel();
            }
        } else {
            error!("session store dropped while cancel lock was held");
        }
    }
}
