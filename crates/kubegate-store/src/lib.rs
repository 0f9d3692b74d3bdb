//! # KubeGate Store
//!
//! Persistence for the gateway, split into two independent concerns:
//!
//! - `session` - per-session application state with TTL
//! - `event` - append-only per-stream event log for protocol resumability
//!
//! Both come with an in-memory backend for single-instance deployments and a
//! shared Redis backend for horizontal scaling, selected by configuration
//! through the factory functions.

pub mod event;
pub mod session;

pub use event::{build_event_store, EventCallback, EventRecord, EventStore, InMemoryEventStore};
pub use session::{
    build_session_store, InMemorySessionStore, SessionData, SessionStore, StickySessionStore,
};
