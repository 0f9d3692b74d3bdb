//! Event storage for protocol resumability.
//!
//! An append-only, per-stream ordered log of outbound protocol messages.
//! Independent of session storage: events hold wire messages, not
//! application data. A client that reconnects presents the last event id it
//! received and gets everything newer replayed, in order.
//!
//! Event ids are composite: `{stream_id}:{sequence}`. Sequences assigned by
//! a shared backend may themselves contain `-` or `:`, so ids are always
//! split at the **last** `:`; the remainder is the stream id.

mod memory;
mod redis;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use kubegate_core::config::{EventStoreBackend, EventStoreSettings};

pub use memory::InMemoryEventStore;
pub use self::redis::RedisEventStore;

/// One record in a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Composite id, `{stream_id}:{sequence}`.
    pub event_id: String,
    pub stream_id: String,
    /// Serialized JSON-RPC payload; absent for priming records.
    pub message: Option<Value>,
}

/// Callback invoked once per replayed record, in sequence order.
pub type EventCallback = Box<dyn FnMut(EventRecord) -> BoxFuture<'static, ()> + Send>;

/// Append-only per-stream event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a message (or a priming record when `message` is `None`) and
    /// return its composite event id. Sequences are store-assigned and
    /// strictly increasing within a stream.
    async fn store_event(&self, stream_id: &str, message: Option<Value>) -> Result<String>;

    /// Replay all records with a sequence strictly greater than the one in
    /// `last_event_id`, invoking `send` once per record in order.
    ///
    /// Returns the stream id when at least one record was replayed. An
    /// unknown or malformed `last_event_id` yields `Ok(None)` without
    /// invoking the callback.
    async fn replay_events_after(
        &self,
        last_event_id: &str,
        send: &mut EventCallback,
    ) -> Result<Option<String>>;
}

/// Split a composite event id into `(stream_id, sequence)` at the last `:`.
pub(crate) fn parse_event_id(event_id: &str) -> Option<(&str, &str)> {
    let (stream, sequence) = event_id.rsplit_once(':')?;
    if stream.is_empty() || sequence.is_empty() {
        return None;
    }
    Some((stream, sequence))
}

/// Build the event store selected by configuration; `None` when disabled.
pub async fn build_event_store(
    settings: &EventStoreSettings,
) -> Result<Option<Arc<dyn EventStore>>> {
    let store: Option<Arc<dyn EventStore>> = match settings.backend {
        EventStoreBackend::None => None,
        EventStoreBackend::Memory => {
            Some(Arc::new(InMemoryEventStore::new(settings.max_events)))
        }
        EventStoreBackend::Shared => {
            let url = settings.url.as_deref().ok_or_else(|| {
                anyhow::anyhow!("event_store.url is required for the shared backend")
            })?;
            Some(Arc::new(
                RedisEventStore::connect(url, settings.max_events, settings.ttl_seconds).await?,
            ))
        }
    };
    Ok(store)
}
