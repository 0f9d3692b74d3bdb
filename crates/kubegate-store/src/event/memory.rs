//! In-memory event store.
//!
//! Per-stream ordered lists with a global sequence counter. Sequences must
//! be monotonic across the whole store, so appends serialize on one lock
//! rather than a per-stream map. Streams are trimmed to the most recent
//! `max_events` on every append. Single-instance only; a restart loses
//! resumability, never correctness.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{parse_event_id, EventCallback, EventRecord, EventStore};

struct StoredEvent {
    sequence: u64,
    message: Option<Value>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Vec<StoredEvent>>,
    counter: u64,
}

pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
    max_events: usize,
}

impl InMemoryEventStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_events: max_events.max(1),
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(&self, stream_id: &str, message: Option<Value>) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.counter += 1;
        let sequence = inner.counter;

        let events = inner.streams.entry(stream_id.to_string()).or_default();
        events.push(StoredEvent { sequence, message });

        if events.len() > self.max_events {
            let excess = events.len() - self.max_events;
            events.drain(..excess);
        }

        Ok(format!("{stream_id}:{sequence}"))
    }

    async fn replay_events_after(
        &self,
        last_event_id: &str,
        send: &mut EventCallback,
    ) -> Result<Option<String>> {
        let Some((stream_id, sequence)) = parse_event_id(last_event_id) else {
            return Ok(None);
        };
        let Ok(last_sequence) = sequence.parse::<u64>() else {
            return Ok(None);
        };

        // Clone the backlog out so the callback runs without the lock held
        let backlog: Vec<EventRecord> = {
            let inner = self.inner.lock().await;
            let Some(events) = inner.streams.get(stream_id) else {
                return Ok(None);
            };
            events
                .iter()
                .filter(|e| e.sequence > last_sequence)
                .map(|e| EventRecord {
                    event_id: format!("{stream_id}:{}", e.sequence),
                    stream_id: stream_id.to_string(),
                    message: e.message.clone(),
                })
                .collect()
        };

        if backlog.is_empty() {
            return Ok(None);
        }

        for record in backlog {
            send(record).await;
        }

        Ok(Some(stream_id.to_string()))
    }
}
