#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parley_server::config::Config;
use parley_server::AppState;

pub const LOBBY: &str = "Main Chat Room";

pub fn test_config() -> Config {
    Config::default()
}

pub fn test_state() -> AppState {
    AppState::new(test_config())
}

/// Build the full app router with test state.
pub fn test_app() -> (Router, AppState) {
    let state = test_state();
    let app = parley_server::routes::router().with_state(state.clone());
    (app, state)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server_with(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(config);
    let app = parley_server::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

pub async fn start_ws_server() -> (SocketAddr, AppState) {
    start_ws_server_with(test_config()).await
}

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected gateway client.
pub struct TestClient {
    pub id: String,
    write: SplitSink<Stream, tungstenite::Message>,
    read: SplitStream<Stream>,
    last_seq: u64,
}

impl TestClient {
    /// Connect and consume the `connected` greeting.
    pub async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{addr}/gateway");
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("ws connect");
        let (write, read) = ws_stream.split();

        let mut client = Self {
            id: String::new(),
            write,
            read,
            last_seq: 0,
        };
        let hello = client.expect("connected").await;
        client.id = hello["id"].as_str().expect("connection id").to_string();
        client
    }

    pub async fn send(&mut self, event: &str, data: Value) {
        let frame = serde_json::json!({ "event": event, "data": data });
        self.write
            .send(tungstenite::Message::Text(frame.to_string().into()))
            .await
            .expect("send frame");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.write
            .send(tungstenite::Message::Text(text.to_string().into()))
            .await
            .expect("send raw frame");
    }

    /// Next event frame as `(event, data)`. Asserts `seq` keeps increasing.
    pub async fn next_event(&mut self) -> (String, Value) {
        loop {
            let msg = time::timeout(Duration::from_secs(5), self.read.next())
                .await
                .expect("timeout waiting for event")
                .expect("stream ended")
                .expect("ws read error");

            let text = match msg {
                tungstenite::Message::Text(text) => text,
                tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            };
            let frame: Value = serde_json::from_str(&text).expect("parse frame");
            let seq = frame["seq"].as_u64().expect("seq present");
            assert!(seq > self.last_seq, "seq must increase: {seq} after {}", self.last_seq);
            self.last_seq = seq;
            return (
                frame["event"].as_str().expect("event name").to_string(),
                frame["data"].clone(),
            );
        }
    }

    /// Skip frames until `event` arrives and return its data.
    pub async fn expect(&mut self, event: &str) -> Value {
        loop {
            let (name, data) = self.next_event().await;
            if name == event {
                return data;
            }
        }
    }

    /// Assert no frame arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(Ok(msg))) = time::timeout(wait, self.read.next()).await {
            panic!("expected no event, got {msg:?}");
        }
    }

    pub async fn close(mut self) {
        let _ = self.write.send(tungstenite::Message::Close(None)).await;
    }
}
