//! KubeGate server binary.
//!
//! Loads configuration, applies CLI overrides, probes the tool catalog, and
//! serves MCP over the configured transport. Exits non-zero when the
//! configuration is invalid or a required tool is missing.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kubegate_core::config::{load_config, TransportKind};
use kubegate_gateway::server::{GatewayServer, ServerBundle};

#[derive(Parser, Debug)]
#[command(
    name = "kubegate",
    version,
    about = "MCP gateway exposing Kubernetes CLI tools to LLM agents"
)]
struct Cli {
    /// Configuration directory (default: ~/.kubegate)
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Transport protocol (overrides config)
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,

    /// Host to bind for the HTTP transport (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on for the HTTP transport (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Skip tool availability probing (for testing without the CLIs)
    #[arg(long)]
    skip_tool_validation: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TransportArg {
    Stdio,
    StreamableHttp,
}

fn init_tracing(log_level: &str, stdio_transport: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kubegate={log_level},rmcp=warn")));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if stdio_transport {
        // stdout belongs to the protocol when serving over stdio
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config_dir.as_deref())?;

    if let Some(transport) = cli.transport {
        config.server.transport = match transport {
            TransportArg::Stdio => TransportKind::Stdio,
            TransportArg::StreamableHttp => TransportKind::StreamableHttp,
        };
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_tracing(
        &config.server.log_level,
        config.server.transport == TransportKind::Stdio,
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?config.server.transport,
        "starting kubegate"
    );

    let bundle = ServerBundle::build(config, cli.config_dir, cli.skip_tool_validation).await?;
    GatewayServer::new(bundle).run().await
}
