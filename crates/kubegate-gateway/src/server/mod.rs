//! Server bundle and lifecycle.
//!
//! Composes validator, runner, registry, stores, and metrics into a running
//! MCP server. The HTTP transport nests rmcp's Streamable HTTP service under
//! `/mcp` and wraps it with the session/event middleware; the stdio
//! transport serves the same handler over stdin/stdout. SIGHUP rebuilds the
//! configuration and swaps the validator in place without dropping sessions.

mod events;
pub mod handlers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use kubegate_core::config::{reload_config, KubeGateConfig, TransportKind};
use kubegate_core::validator::CommandValidator;
use kubegate_exec::runner::CommandRunner;
use kubegate_store::{build_event_store, build_session_store, EventStore, SessionStore};

use crate::mcp::KubeGateHandler;
use crate::metrics::GatewayMetrics;
use crate::registry::ToolRegistry;

pub use events::{session_event_middleware, EventLayerState};
pub use handlers::AppState;

/// Everything the gateway needs to serve, wired together.
pub struct ServerBundle {
    pub config: KubeGateConfig,
    pub config_dir: Option<PathBuf>,
    pub validator: Arc<RwLock<CommandValidator>>,
    pub runner: Arc<CommandRunner>,
    pub registry: Arc<ToolRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub events: Option<Arc<dyn EventStore>>,
    pub metrics: Arc<GatewayMetrics>,
}

impl ServerBundle {
    /// Build and probe everything. Fails fast when configuration is invalid
    /// or a required tool is missing.
    pub async fn build(
        config: KubeGateConfig,
        config_dir: Option<PathBuf>,
        skip_tool_validation: bool,
    ) -> Result<Self> {
        config.validate()?;

        let validator = Arc::new(RwLock::new(CommandValidator::new(&config.security)));
        let runner = Arc::new(CommandRunner::new(
            validator.clone(),
            config.command.clone(),
        ));

        let (registry, report) =
            ToolRegistry::discover(&config, runner.clone(), skip_tool_validation).await;
        ToolRegistry::ensure_required(&report)?;
        info!("\n{}", report.summary());

        if registry.is_empty() {
            warn!("no tools available; the gateway will serve an empty catalog");
        }

        let sessions = build_session_store(&config.session)
            .await
            .context("failed to build session store")?;
        let events = build_event_store(&config.event_store)
            .await
            .context("failed to build event store")?;

        Ok(Self {
            config,
            config_dir,
            validator,
            runner,
            registry: Arc::new(registry),
            sessions,
            events,
            metrics: Arc::new(GatewayMetrics::new()),
        })
    }

    pub fn handler(&self) -> KubeGateHandler {
        KubeGateHandler::new(
            self.registry.clone(),
            self.validator.clone(),
            self.metrics.clone(),
        )
    }
}

/// The runnable gateway server.
pub struct GatewayServer {
    bundle: ServerBundle,
    cancel: CancellationToken,
}

impl GatewayServer {
    pub fn new(bundle: ServerBundle) -> Self {
        Self {
            bundle,
            cancel: CancellationToken::new(),
        }
    }

    pub fn bundle(&self) -> &ServerBundle {
        &self.bundle
    }

    /// Serve on the configured transport until shutdown.
    pub async fn run(self) -> Result<()> {
        match self.bundle.config.server.transport {
            TransportKind::Stdio => self.run_stdio().await,
            TransportKind::StreamableHttp => self.run_http().await,
        }
    }

    async fn run_stdio(self) -> Result<()> {
        info!("serving MCP over stdio");
        let handler = self.bundle.handler();
        let service = handler
            .serve(rmcp::transport::stdio())
            .await
            .context("stdio transport failed to start")?;
        service.waiting().await.context("stdio service failed")?;
        Ok(())
    }

    async fn run_http(self) -> Result<()> {
        let addr: SocketAddr = format!(
            "{}:{}",
            self.bundle.config.server.host, self.bundle.config.server.port
        )
        .parse()
        .context("invalid server host/port")?;

        self.bundle.sessions.start().await?;
        self.spawn_reload_task();

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!(%addr, "gateway listening");
        if self.bundle.events.is_some() {
            info!("event store enabled; session resumability active");
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;

        info!("draining complete, stopping stores");
        self.bundle.sessions.stop().await;
        self.cancel.cancel();
        Ok(())
    }

    /// Build the axum router: rmcp service under `/mcp` behind the
    /// session/event layer, plus health and metrics endpoints.
    pub fn build_router(&self) -> Router {
        let handler = self.bundle.handler();
        let mcp_service = StreamableHttpService::new(
            move || Ok(handler.clone()),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig {
                stateful_mode: true,
                sse_keep_alive: Some(std::time::Duration::from_secs(30)),
                sse_retry: Some(std::time::Duration::from_secs(3)),
                cancellation_token: self.cancel.child_token(),
            },
        );

        let event_state = EventLayerState {
            sessions: self.bundle.sessions.clone(),
            events: self.bundle.events.clone(),
            metrics: self.bundle.metrics.clone(),
        };
        let mcp_routes = Router::new()
            .nest_service("/mcp", mcp_service)
            .layer(middleware::from_fn_with_state(
                event_state,
                session_event_middleware,
            ));

        let app_state = AppState {
            sessions: self.bundle.sessions.clone(),
            metrics: self.bundle.metrics.clone(),
        };

        Router::new()
            .route("/health", get(handlers::health))
            .route("/ready", get(handlers::ready))
            .route("/metrics", get(handlers::metrics))
            .with_state(app_state)
            .merge(mcp_routes)
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
    }

    /// SIGHUP rebuilds configuration and swaps the validator atomically.
    /// In-flight requests finish under the old policy; reload failures keep
    /// the previous configuration.
    fn spawn_reload_task(&self) {
        #[cfg(unix)]
        {
            let validator = self.bundle.validator.clone();
            let config_dir = self.bundle.config_dir.clone();
            let mut config = self.bundle.config.clone();
            let cancel = self.cancel.child_token();

            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                let mut hangup = match signal(SignalKind::hangup()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGHUP handler");
                        return;
                    }
                };

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = hangup.recv() => {
                            if received.is_none() {
                                break;
                            }
                            config = reload_config(&config, config_dir.as_deref());
                            let rebuilt = CommandValidator::new(&config.security);
                            *validator.write().await = rebuilt;
                            info!("configuration reloaded, validator swapped");
                        }
                    }
                }
            });
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining in-flight requests");
}
