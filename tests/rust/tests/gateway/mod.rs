//! Gateway end-to-end tests over the Streamable HTTP transport.
//!
//! Spin up the real router on a random port, connect with an rmcp client,
//! and exercise the tool surface the way an agent would.

use std::sync::Arc;

use rmcp::{
    model::*,
    transport::StreamableHttpClientTransport,
    ServiceExt,
};
use tokio_util::sync::CancellationToken;

use kubegate_gateway::server::{GatewayServer, ServerBundle};
use kubegate_store::{EventStore, SessionStore};
use tests::echo_config;

struct RunningGateway {
    base_url: String,
    mcp_url: String,
    sessions: Arc<dyn SessionStore>,
    events: Option<Arc<dyn EventStore>>,
    cancel: CancellationToken,
}

async fn start_gateway(bundle: ServerBundle) -> RunningGateway {
    let sessions = bundle.sessions.clone();
    let events = bundle.events.clone();

    let server = GatewayServer::new(bundle);
    let router = server.build_router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to random port");
    let addr = listener.local_addr().unwrap();

    let cancel = CancellationToken::new();
    let ct = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { ct.cancelled().await })
            .await
            .unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    RunningGateway {
        base_url: format!("http://127.0.0.1:{}", addr.port()),
        mcp_url: format!("http://127.0.0.1:{}/mcp", addr.port()),
        sessions,
        events,
        cancel,
    }
}

async fn connect(
    mcp_url: &str,
) -> rmcp::service::RunningService<rmcp::service::RoleClient, ClientInfo> {
    let transport = StreamableHttpClientTransport::from_uri(mcp_url);
    ClientInfo {
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "kubegate-test-client".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
    .serve(transport)
    .await
    .expect("client should connect")
}

fn content_text(result: &CallToolResult) -> String {
    let json = serde_json::to_value(&result.content).expect("content serializes");
    json[0]["text"].as_str().unwrap_or_default().to_string()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_tools_exposes_execute_and_describe() {
    let bundle = tests::echo_bundle().await;
    let gateway = start_gateway(bundle).await;
    let client = connect(&gateway.mcp_url).await;

    let tools = client.list_tools(Default::default()).await.unwrap();
    let names: Vec<String> = tools.tools.iter().map(|t| t.name.to_string()).collect();
    assert!(names.contains(&"execute_echo".to_string()), "{names:?}");
    assert!(names.contains(&"describe_echo".to_string()), "{names:?}");

    let execute = tools
        .tools
        .iter()
        .find(|t| t.name == "execute_echo")
        .unwrap();
    let schema = serde_json::to_value(execute.input_schema.as_ref()).unwrap();
    assert!(schema["properties"]["command"].is_object());
    assert!(schema["properties"]["timeout"].is_object());

    client.cancel().await.ok();
    gateway.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_tool_filters_arguments_and_executes() {
    let bundle = tests::echo_bundle().await;
    let gateway = start_gateway(bundle).await;
    let client = connect(&gateway.mcp_url).await;

    // Extra bookkeeping fields the schema does not declare are dropped
    // before validation rather than failing the call
    let params: CallToolRequestParams = serde_json::from_value(serde_json::json!({
        "name": "execute_echo",
        "arguments": {
            "command": "echo hello from gateway",
            "toolCallId": "call_123",
            "extra": {"nested": true}
        }
    }))
    .unwrap();

    let result = client.call_tool(params).await.unwrap();
    assert_eq!(result.is_error, Some(false));
    assert!(content_text(&result).contains("hello from gateway"));

    client.cancel().await.ok();
    gateway.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_tool_blocked_by_policy() {
    let mut config = echo_config();
    config
        .security
        .dangerous_commands
        .insert("echo".to_string(), vec!["echo danger".to_string()]);

    let bundle = ServerBundle::build(config, None, false).await.unwrap();
    let gateway = start_gateway(bundle).await;
    let client = connect(&gateway.mcp_url).await;

    let params: CallToolRequestParams = serde_json::from_value(serde_json::json!({
        "name": "execute_echo",
        "arguments": {"command": "echo danger zone"}
    }))
    .unwrap();

    let result = client.call_tool(params).await.unwrap();
    assert_eq!(result.is_error, Some(true));
    assert!(content_text(&result).contains("Command blocked"));

    client.cancel().await.ok();
    gateway.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_describe_tool_returns_text() {
    let bundle = tests::echo_bundle().await;
    let gateway = start_gateway(bundle).await;
    let client = connect(&gateway.mcp_url).await;

    let params: CallToolRequestParams = serde_json::from_value(serde_json::json!({
        "name": "describe_echo",
        "arguments": {}
    }))
    .unwrap();

    let result = client.call_tool(params).await.unwrap();
    assert!(!content_text(&result).is_empty());

    client.cancel().await.ok();
    gateway.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_tool_is_protocol_error() {
    let bundle = tests::echo_bundle().await;
    let gateway = start_gateway(bundle).await;
    let client = connect(&gateway.mcp_url).await;

    let params: CallToolRequestParams = serde_json::from_value(serde_json::json!({
        "name": "execute_nonexistent",
        "arguments": {"command": "x"}
    }))
    .unwrap();

    assert!(client.call_tool(params).await.is_err());

    client.cancel().await.ok();
    gateway.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_initialize_creates_session_entry() {
    let bundle = tests::echo_bundle().await;
    let gateway = start_gateway(bundle).await;
    let client = connect(&gateway.mcp_url).await;

    // The middleware keys the session store off the transport session id
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(gateway.sessions.count().await.unwrap(), 1);

    client.cancel().await.ok();
    gateway.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resources_surface() {
    let bundle = tests::echo_bundle().await;
    let gateway = start_gateway(bundle).await;
    let client = connect(&gateway.mcp_url).await;

    let resources = client.list_resources(Default::default()).await.unwrap();
    let uris: Vec<String> = resources
        .resources
        .iter()
        .map(|r| r.uri.to_string())
        .collect();
    assert!(uris.contains(&"kubegate://tools".to_string()));
    assert!(uris.contains(&"kubegate://security/policy".to_string()));

    let params: ReadResourceRequestParams = serde_json::from_value(serde_json::json!({
        "uri": "kubegate://tools"
    }))
    .unwrap();
    let contents = client.read_resource(params).await.unwrap();
    let json = serde_json::to_value(&contents.contents).unwrap();
    assert!(json[0]["text"].as_str().unwrap().contains("echo"));

    client.cancel().await.ok();
    gateway.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_ready_metrics_endpoints() {
    let bundle = tests::echo_bundle().await;
    let gateway = start_gateway(bundle).await;

    let health: serde_json::Value = reqwest::get(format!("{}/health", gateway.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "kubegate");

    let ready = reqwest::get(format!("{}/ready", gateway.base_url))
        .await
        .unwrap();
    assert_eq!(ready.status(), 200);

    let metrics = reqwest::get(format!("{}/metrics", gateway.base_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("kubegate_sessions_active"));

    gateway.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_event_backlog_served_on_reconnect() {
    let bundle = tests::echo_bundle().await;
    let gateway = start_gateway(bundle).await;
    let events = gateway.events.clone().expect("echo config enables events");

    for n in 1..=3 {
        events
            .store_event("resume-me", Some(serde_json::json!({"seq": n})))
            .await
            .unwrap();
    }

    let response = reqwest::Client::new()
        .get(format!("{}/mcp", gateway.base_url))
        .header("Last-Event-ID", "resume-me:1")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap(),
        "text/event-stream"
    );

    let body = response.text().await.unwrap();
    assert!(body.contains("id: resume-me:2"));
    assert!(body.contains("id: resume-me:3"));
    assert!(!body.contains("id: resume-me:1\n"));

    gateway.cancel.cancel();
}
