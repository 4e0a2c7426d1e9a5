//! WebSocket transport.
//!
//! One JSON-RPC message per text frame. Each socket gets its own
//! [`Connection`] and is served by its own task; messages within a socket
//! are handled in order, so replies are never reordered.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::{debug, error, info};

use super::mcp::Connection;
use super::{Dispatcher, SharedState};
use crate::audit::ClientInfo;

/// Router serving the MCP endpoint at `/` and `/mcp`.
pub fn router(state: SharedState) -> Router {
    let dispatcher = Arc::new(Dispatcher::new(state));
    Router::new()
        .route("/", get(ws_handler))
        .route("/mcp", get(ws_handler))
        .with_state(dispatcher)
}

/// Bind `addr` and serve until the listener fails.
pub async fn serve_websocket(state: SharedState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "MCP Research Context Server listening on WebSocket");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(dispatcher): State<Arc<Dispatcher>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, peer))
}

async fn handle_socket(mut socket: WebSocket, dispatcher: Arc<Dispatcher>, peer: SocketAddr) {
    info!(peer = %peer, "WebSocket client connected");
    let mut connection = Connection::new(ClientInfo::websocket(peer.to_string()));

    while let Some(msg_result) = socket.recv().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                debug!(peer = %peer, request = %text.as_str(), "Received request");

                if let Some(response) = dispatcher
                    .handle_message(&mut connection, text.as_str())
                    .await
                {
                    match serde_json::to_string(&response) {
                        Ok(json) => {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => error!(error = %e, "Failed to serialize response"),
                    }
                }

                if connection.is_closed() {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(peer = %peer, "Close frame received");
                break;
            }
            Err(e) => {
                error!(peer = %peer, error = %e, "WebSocket error");
                break;
            }
            // Pings are answered by axum itself.
            _ => {}
        }
    }

    info!(peer = %peer, "WebSocket client disconnected");
}
