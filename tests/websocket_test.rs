//! WebSocket transport tests against a server bound to an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use mcp_research_context::config::Config;
use mcp_research_context::server::{router, AppState};

async fn spawn_server() -> (tempfile::TempDir, SocketAddr) {
    let home = tempfile::tempdir().unwrap();
    let state = Arc::new(AppState::new(Config::isolated(home.path())).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (home, addr)
}

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn roundtrip(socket: &mut Socket, message: Value) -> Value {
    socket
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn handshake(socket: &mut Socket) {
    let reply = roundtrip(
        socket,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2025-03-26", "capabilities": {}}
        }),
    )
    .await;
    assert_eq!(reply["result"]["protocolVersion"], "2025-03-26");

    socket
        .send(Message::Text(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_websocket_initialize_and_list() {
    let (_home, addr) = spawn_server().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/mcp", addr))
        .await
        .unwrap();

    handshake(&mut socket).await;

    let reply = roundtrip(
        &mut socket,
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["result"]["tools"].as_array().unwrap().len(), 30);
}

#[tokio::test]
async fn test_websocket_connections_have_separate_state() {
    let (_home, addr) = spawn_server().await;
    let url = format!("ws://{}/", addr);

    let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    handshake(&mut first).await;

    // The second socket never initialized
    let reply = roundtrip(
        &mut second,
        json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "reset_context", "arguments": {}}
        }),
    )
    .await;
    assert_eq!(reply["error"]["code"], -32600);

    let reply = roundtrip(
        &mut first,
        json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "tools/call",
            "params": {"name": "reset_context", "arguments": {}}
        }),
    )
    .await;
    assert!(reply.get("result").is_some(), "{}", reply);
}

#[tokio::test]
async fn test_websocket_tool_call_returns_text_content() {
    let (_home, addr) = spawn_server().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/mcp", addr))
        .await
        .unwrap();
    handshake(&mut socket).await;

    let reply = roundtrip(
        &mut socket,
        json!({
            "jsonrpc": "2.0",
            "id": "abc",
            "method": "tools/call",
            "params": {"name": "plan_literature_search", "arguments": {"topic": "sleep"}}
        }),
    )
    .await;
    assert_eq!(reply["id"], "abc");
    let content = &reply["result"]["content"][0];
    assert_eq!(content["type"], "text");
    let body: Value = serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
    assert_eq!(body["research_category"], "literature_review");
}

#[tokio::test]
async fn test_websocket_ping_payload_is_echoed() {
    let (_home, addr) = spawn_server().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/mcp", addr))
        .await
        .unwrap();
    handshake(&mut socket).await;

    socket
        .send(Message::Ping(b"heartbeat-7".to_vec().into()))
        .await
        .unwrap();
    socket
        .send(Message::Text(
            json!({"jsonrpc": "2.0", "id": 9, "method": "ping"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let mut pong = None;
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Pong(payload) => pong = Some(payload.to_vec()),
            Message::Text(text) => {
                let reply: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(reply["id"], 9);
                break;
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
    assert_eq!(pong.as_deref(), Some(&b"heartbeat-7"[..]));
}
