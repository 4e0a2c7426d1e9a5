use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_research_context::{
    config::{Config, LogFormat, TransportKind},
    server::{serve_websocket, AppState, McpServer},
};

/// MCP server for research projects: context detection, audit trail and
/// cross-session workflow progress.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Transport to serve on (stdio or websocket)
    #[arg(long, env = "MCP_TRANSPORT")]
    transport: Option<TransportKind>,

    /// Listen address for the WebSocket transport
    #[arg(long, env = "MCP_LISTEN_ADDR")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(kind) = args.transport {
        config.transport.kind = kind;
    }
    if let Some(addr) = args.listen {
        config.transport.listen_addr = addr;
    }

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?config.transport.kind,
        home = %config.context.home_dir.display(),
        "MCP Research Context Server starting..."
    );

    let transport = config.transport.clone();
    let state = match AppState::new(config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "Failed to initialize application state");
            return Err(e.into());
        }
    };

    let result = match transport.kind {
        TransportKind::Stdio => {
            info!("Server ready, waiting for requests on stdin...");
            McpServer::new(state).run().await
        }
        TransportKind::WebSocket => serve_websocket(state, transport.listen_addr).await,
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
