//! Store integration tests: factory selection and trait-object behavior.

use std::sync::Arc;

use kubegate_core::config::{
    EventStoreBackend, EventStoreSettings, SessionBackend, SessionSettings,
};
use kubegate_store::{
    build_event_store, build_session_store, EventCallback, EventRecord, EventStore, SessionStore,
};

fn memory_session_settings() -> SessionSettings {
    SessionSettings {
        backend: SessionBackend::Memory,
        ttl_seconds: 3600,
        cleanup_interval_seconds: 300,
        url: None,
    }
}

#[tokio::test]
async fn test_session_factory_memory_roundtrip() {
    let store = build_session_store(&memory_session_settings()).await.unwrap();

    let mut info = serde_json::Map::new();
    info.insert("name".to_string(), serde_json::Value::String("agent".into()));
    store.create("s1", info).await.unwrap();

    let session = store.get("s1").await.unwrap().unwrap();
    assert_eq!(session.client_info["name"], "agent");
    assert_eq!(store.count().await.unwrap(), 1);

    assert!(store.delete("s1").await.unwrap());
    assert!(store.get("s1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_factory_sticky() {
    let settings = SessionSettings {
        backend: SessionBackend::Sticky,
        ..memory_session_settings()
    };
    let store = build_session_store(&settings).await.unwrap();
    store.create("s1", serde_json::Map::new()).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_session_factory_shared_requires_url() {
    let settings = SessionSettings {
        backend: SessionBackend::Shared,
        url: None,
        ..memory_session_settings()
    };
    assert!(build_session_store(&settings).await.is_err());
}

#[tokio::test]
async fn test_event_factory_none_is_disabled() {
    let settings = EventStoreSettings {
        backend: EventStoreBackend::None,
        ..Default::default()
    };
    assert!(build_event_store(&settings).await.unwrap().is_none());
}

#[tokio::test]
async fn test_event_replay_scenario() {
    // Stream S holds sequences 1..=5; a client resuming from S:3 receives
    // S:4 then S:5 and the stream id back
    let settings = EventStoreSettings {
        backend: EventStoreBackend::Memory,
        ..Default::default()
    };
    let store = build_event_store(&settings).await.unwrap().unwrap();

    let mut last_id = String::new();
    for n in 1..=5 {
        last_id = store
            .store_event("S", Some(serde_json::json!({"seq": n})))
            .await
            .unwrap();
    }
    assert_eq!(last_id, "S:5");

    let seen: Arc<tokio::sync::Mutex<Vec<EventRecord>>> =
        Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut callback: EventCallback = Box::new(move |record| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().await.push(record);
        })
    });

    let stream = store.replay_events_after("S:3", &mut callback).await.unwrap();
    assert_eq!(stream.as_deref(), Some("S"));

    let seen = seen.lock().await;
    let ids: Vec<&str> = seen.iter().map(|r| r.event_id.as_str()).collect();
    assert_eq!(ids, vec!["S:4", "S:5"]);
}

#[tokio::test]
async fn test_event_replay_invalid_id_no_callbacks() {
    let settings = EventStoreSettings {
        backend: EventStoreBackend::Memory,
        ..Default::default()
    };
    let store = build_event_store(&settings).await.unwrap().unwrap();
    store.store_event("S", None).await.unwrap();

    let called = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = called.clone();
    let mut callback: EventCallback = Box::new(move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Box::pin(async {})
    });

    for bad in ["", "S", "S:notanumber", "other:1"] {
        let result = store.replay_events_after(bad, &mut callback).await.unwrap();
        assert!(result.is_none(), "{bad:?} should not replay");
    }
    assert_eq!(called.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_session_expiry_sweep() {
    let settings = SessionSettings {
        backend: SessionBackend::Memory,
        ttl_seconds: 0,
        cleanup_interval_seconds: 1,
        url: None,
    };
    let store = build_session_store(&settings).await.unwrap();
    store.start().await.unwrap();

    store.create("gone", serde_json::Map::new()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;

    assert_eq!(store.count().await.unwrap(), 0);
    store.stop().await;
}
