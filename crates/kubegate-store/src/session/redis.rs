//! Redis-backed session storage.
//!
//! One key per session, `{prefix}{id}`, holding the serialized session with
//! a native TTL. Every read rewrites the entry with a refreshed TTL, so the
//! sliding expiry matches the in-memory semantics. `count` walks a
//! non-blocking SCAN cursor rather than KEYS.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{SessionData, SessionStore};

const KEY_PREFIX: &str = "kubegate:session:";

pub struct RedisSessionStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    /// Connect and verify the backend with a PING.
    pub async fn connect(url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;

        let mut probe = conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut probe)
            .await
            .context("redis ping failed")?;

        info!("session store connected to redis");
        Ok(Self { conn, ttl_seconds })
    }

    fn key(session_id: &str) -> String {
        format!("{KEY_PREFIX}{session_id}")
    }

    async fn write(&self, session: &SessionData) -> Result<()> {
        let payload = serde_json::to_string(session)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(Self::key(&session.session_id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async::<()>(&mut conn)
            .await
            .context("failed to write session")?;
        Ok(())
    }

    async fn read(&self, session_id: &str) -> Result<Option<SessionData>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(Self::key(session_id))
            .query_async(&mut conn)
            .await
            .context("failed to read session")?;

        match payload {
            Some(json) => Ok(serde_json::from_str(&json).ok()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(
        &self,
        session_id: &str,
        client_info: Map<String, Value>,
    ) -> Result<SessionData> {
        let session = SessionData::new(session_id, client_info);
        self.write(&session).await?;
        debug!(session_id, "session created");
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionData>> {
        let Some(mut session) = self.read(session_id).await? else {
            return Ok(None);
        };

        // Refresh both the payload timestamp and the key TTL
        session.last_accessed = chrono::Utc::now();
        self.write(&session).await?;
        Ok(Some(session))
    }

    async fn update(&self, session_id: &str, patch: Map<String, Value>) -> Result<bool> {
        let Some(mut session) = self.read(session_id).await? else {
            return Ok(false);
        };

        session.data.extend(patch);
        session.last_accessed = chrono::Utc::now();
        self.write(&session).await?;
        Ok(true)
    }

    async fn touch(&self, session_id: &str) -> Result<bool> {
        let Some(mut session) = self.read(session_id).await? else {
            return Ok(false);
        };

        session.last_accessed = chrono::Utc::now();
        self.write(&session).await?;
        Ok(true)
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(Self::key(session_id))
            .query_async(&mut conn)
            .await
            .context("failed to delete session")?;
        Ok(removed > 0)
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        // Native TTL expires keys; nothing to sweep
        Ok(0)
    }

    async fn count(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut total = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{KEY_PREFIX}*"))
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .context("failed to scan sessions")?;

            total += keys.len();
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(total)
    }
}
