//! End-to-end websocket scenarios (§8 "Concrete scenarios"), driven over a
//! real `TcpListener` with a `tokio-tungstenite` client — the framed
//! protocol is the contract, and the only way to exercise the full
//! gateway→registry→pty round trip is a real socket.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use termgate::config::Config;
use termgate::server::Server;

async fn spawn_test_server(data_dir: &std::path::Path) -> String {
    let mut config = Config::default();
    config.persistence.data_dir = data_dir.to_path_buf();

    let server = Server::new(&config).await.expect("server construction");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, server.router()).await.unwrap();
    });

    format!("ws://{addr}/ws")
}

async fn next_json(
    ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");

        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("frame is valid json");
        }
    }
}

#[tokio::test]
async fn create_input_close_round_trip_for_a_local_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let url = spawn_test_server(dir.path()).await;

    let (mut ws, _) = connect_async(&url).await.expect("connect");

    let ready = next_json(&mut ws).await;
    assert_eq!(ready["type"], "connection_established");

    ws.send(Message::Text(
        json!({"type": "create_terminal", "cols": 80, "rows": 24}).to_string().into(),
    ))
    .await
    .unwrap();

    let created = next_json(&mut ws).await;
    assert_eq!(created["type"], "terminal_created");
    let session_id = created["sessionId"].as_str().unwrap().to_string();
    assert!(created["title"].as_str().unwrap().starts_with("Terminal"));

    let input_data = base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        b"echo hi\r".as_slice(),
    );
    ws.send(Message::Text(
        json!({"type": "input", "sessionId": session_id, "data": input_data})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    let mut seen_hi = false;
    for _ in 0..20 {
        let frame = next_json(&mut ws).await;
        if frame["type"] == "data" {
            let decoded = base64::Engine::decode(
                &base64::engine::general_purpose::STANDARD,
                frame["data"].as_str().unwrap(),
            )
            .unwrap_or_default();
            if String::from_utf8_lossy(&decoded).contains("hi") {
                seen_hi = true;
                break;
            }
        }
    }
    assert!(seen_hi, "expected output containing \"hi\"");

    ws.send(Message::Text(
        json!({"type": "close_terminal", "sessionId": session_id})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    let mut closed = None;
    for _ in 0..10 {
        let frame = next_json(&mut ws).await;
        if frame["type"] == "terminal_closed" {
            closed = Some(frame);
            break;
        }
    }
    assert!(closed.is_some(), "expected exactly one terminal_closed frame");
}

#[tokio::test]
async fn reconnect_ssh_with_unknown_id_yields_a_single_error_frame() {
    let dir = tempfile::tempdir().unwrap();
    let url = spawn_test_server(dir.path()).await;

    let (mut ws, _) = connect_async(&url).await.expect("connect");
    let _ready = next_json(&mut ws).await;

    ws.send(Message::Text(
        json!({"type": "reconnect_ssh", "sessionId": uuid::Uuid::new_v4().to_string()})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "error");
}

#[tokio::test]
async fn oversized_frame_produces_an_error_and_stays_connected() {
    let dir = tempfile::tempdir().unwrap();
    let url = spawn_test_server(dir.path()).await;

    let (mut ws, _) = connect_async(&url).await.expect("connect");
    let _ready = next_json(&mut ws).await;

    let huge_title = "x".repeat(2 * 1024 * 1024);
    ws.send(Message::Text(
        json!({"type": "create_terminal", "cols": 80, "rows": 24, "title": huge_title})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "error");

    // Connection must still be usable afterwards.
    ws.send(Message::Text(
        json!({"type": "create_terminal", "cols": 80, "rows": 24}).to_string().into(),
    ))
    .await
    .unwrap();
    let created = next_json(&mut ws).await;
    assert_eq!(created["type"], "terminal_created");
}
