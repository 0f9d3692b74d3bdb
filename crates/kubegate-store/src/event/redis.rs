//! Redis Streams event store.
//!
//! One stream key per session, `kubegate:events:{stream_id}`. Appends use
//! `XADD` with auto-generated ids and approximate `MAXLEN` trimming; every
//! append refreshes the key TTL, giving a sliding retention window. Replay
//! uses `XRANGE` with an exclusive start.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{parse_event_id, EventCallback, EventRecord, EventStore};

const KEY_PREFIX: &str = "kubegate:events:";

pub struct RedisEventStore {
    conn: ConnectionManager,
    max_events: usize,
    ttl_seconds: u64,
}

impl RedisEventStore {
    pub async fn connect(url: &str, max_events: usize, ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;

        let mut probe = conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut probe)
            .await
            .context("redis ping failed")?;

        info!("event store connected to redis");
        Ok(Self {
            conn,
            max_events,
            ttl_seconds,
        })
    }

    fn key(stream_id: &str) -> String {
        format!("{KEY_PREFIX}{stream_id}")
    }
}

#[async_trait]
impl EventStore for RedisEventStore {
    async fn store_event(&self, stream_id: &str, message: Option<Value>) -> Result<String> {
        let payload = match &message {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };

        let mut conn = self.conn.clone();
        let key = Self::key(stream_id);

        let redis_id: String = redis::cmd("XADD")
            .arg(&key)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_events)
            .arg("*")
            .arg("message")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .context("failed to append event")?;

        // Sliding retention window, refreshed on every append
        redis::cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_seconds)
            .query_async::<i64>(&mut conn)
            .await
            .context("failed to refresh stream ttl")?;

        let event_id = format!("{stream_id}:{redis_id}");
        debug!(event_id, "event stored");
        Ok(event_id)
    }

    async fn replay_events_after(
        &self,
        last_event_id: &str,
        send: &mut EventCallback,
    ) -> Result<Option<String>> {
        let Some((stream_id, redis_id)) = parse_event_id(last_event_id) else {
            warn!(last_event_id, "ignoring malformed event id for replay");
            return Ok(None);
        };

        let mut conn = self.conn.clone();
        let entries: Vec<(String, Vec<(String, String)>)> = redis::cmd("XRANGE")
            .arg(Self::key(stream_id))
            .arg(format!("({redis_id}"))
            .arg("+")
            .query_async(&mut conn)
            .await
            .context("failed to range stream")?;

        if entries.is_empty() {
            return Ok(None);
        }

        let count = entries.len();
        for (entry_id, fields) in entries {
            let message = fields
                .iter()
                .find(|(name, _)| name == "message")
                .and_then(|(_, raw)| {
                    if raw.is_empty() {
                        None
                    } else {
                        serde_json::from_str(raw).ok()
                    }
                });

            send(EventRecord {
                event_id: format!("{stream_id}:{entry_id}"),
                stream_id: stream_id.to_string(),
                message,
            })
            .await;
        }

        debug!(stream_id, count, "events replayed");
        Ok(Some(stream_id.to_string()))
    }
}
