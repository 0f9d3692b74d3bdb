//! Session and event wiring for the HTTP transport.
//!
//! One middleware layer around `/mcp` keeps the application stores in step
//! with the wire protocol:
//!
//! - the response to an `initialize` POST carries the assigned
//!   `Mcp-Session-Id`; that creates the session entry, with the client info
//!   lifted from the request body
//! - every other request carrying the header touches the session, and a
//!   DELETE removes it
//! - JSON responses are appended to the event store keyed by session id
//! - a GET carrying `Last-Event-ID` is answered from the event store as a
//!   one-shot SSE backlog when the id resolves, otherwise it falls through
//!   to the live transport
//!
//! Store failures degrade: the request proceeds without shared state, and a
//! failed append only suppresses resumability for this connection.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use kubegate_store::{EventCallback, EventRecord, EventStore, SessionStore};

use crate::metrics::GatewayMetrics;

const SESSION_HEADER: &str = "mcp-session-id";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

#[derive(Clone)]
pub struct EventLayerState {
    pub sessions: Arc<dyn SessionStore>,
    pub events: Option<Arc<dyn EventStore>>,
    pub metrics: Arc<GatewayMetrics>,
}

pub async fn session_event_middleware(
    State(state): State<EventLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let session_id = header_value(&request, SESSION_HEADER);

    if method == Method::GET {
        let last_event_id = header_value(&request, LAST_EVENT_ID_HEADER);
        if let (Some(store), Some(last_id)) = (state.events.as_ref(), last_event_id) {
            if let Some(backlog) = replay_backlog(store, &last_id).await {
                return backlog;
            }
        }
        return next.run(request).await;
    }

    if method == Method::DELETE {
        let response = next.run(request).await;
        if let Some(sid) = session_id {
            match state.sessions.delete(&sid).await {
                Ok(true) => {
                    state.metrics.session_closed();
                    info!(session_id = %sid, "session deleted");
                }
                Ok(false) => {}
                Err(e) => warn!(session_id = %sid, error = %e, "session delete failed"),
            }
        }
        return response;
    }

    if method != Method::POST {
        return next.run(request).await;
    }

    // Buffer the request body so an initialize can be recognized
    let (parts, body) = request.into_parts();
    let request_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let client_info = initialize_client_info(&request_bytes);
    let request = Request::from_parts(parts, Body::from(request_bytes));

    let response = next.run(request).await;

    // The initialize response is where the transport assigns the session id
    let sid = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(session_id);
    let Some(sid) = sid else {
        return response;
    };

    if let Some(client_info) = client_info {
        match state.sessions.create(&sid, client_info).await {
            Ok(_) => {
                state.metrics.session_opened();
                info!(session_id = %sid, "session created");
            }
            Err(e) => {
                warn!(session_id = %sid, error = %e, "session store unavailable, proceeding without shared state");
            }
        }
    } else if let Err(e) = state.sessions.touch(&sid).await {
        warn!(session_id = %sid, error = %e, "session touch failed");
    }

    // Append JSON responses to the event store; SSE-streamed responses are
    // left alone so the live channel is never buffered
    if let Some(store) = state.events.as_ref() {
        if is_json(&response) {
            return append_response_event(store, &state.metrics, &sid, response).await;
        }
    }

    response
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

/// Client info from an initialize request body, `None` for anything else.
fn initialize_client_info(body: &[u8]) -> Option<Map<String, Value>> {
    let json: Value = serde_json::from_slice(body).ok()?;
    if json.get("method").and_then(Value::as_str) != Some("initialize") {
        return None;
    }

    Some(
        json.get("params")
            .and_then(|p| p.get("clientInfo"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    )
}

/// Buffer a JSON response, append it to the event store, and rebuild it.
async fn append_response_event(
    store: &Arc<dyn EventStore>,
    metrics: &GatewayMetrics,
    session_id: &str,
    response: Response,
) -> Response {
    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "failed to read response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Ok(message) = serde_json::from_slice::<Value>(&bytes) {
        match store.store_event(session_id, Some(message)).await {
            Ok(event_id) => {
                metrics.event_stored();
                debug!(event_id, "response appended to event store");
            }
            Err(e) => {
                warn!(session_id, error = %e, "event append failed; resumability degraded for this connection");
            }
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Answer a reconnect from the event store: every record newer than
/// `last_event_id`, rendered as a finite SSE stream.
async fn replay_backlog(store: &Arc<dyn EventStore>, last_event_id: &str) -> Option<Response> {
    let collected: Arc<Mutex<Vec<EventRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    let mut callback: EventCallback = Box::new(move |record| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().await.push(record);
        })
    });

    match store.replay_events_after(last_event_id, &mut callback).await {
        Ok(Some(stream_id)) => {
            let records = collected.lock().await;
            info!(stream_id = %stream_id, count = records.len(), "replaying event backlog");

            let mut body = String::new();
            for record in records.iter() {
                let data = record
                    .message
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_default();
                body.push_str(&format!("id: {}\ndata: {}\n\n", record.event_id, data));
            }

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-store")
                .body(Body::from(body))
                .ok()
        }
        Ok(None) => None,
        Err(e) => {
            warn!(last_event_id, error = %e, "event replay failed; falling through to live transport");
            None
        }
    }
}
