//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time;

use crate::error::ChatError;
use crate::rooms::store::Disconnect;
use crate::AppState;

use super::events::{ClientMessage, GatewayMessage};
use super::fanout::BroadcastPayload;
use super::handler::handle_event;
use super::presence::{self, Delivery};
use super::session::GatewaySession;

/// Close code for a peer that stopped answering pings.
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Interval between server pings. A connection that sends nothing (not even
/// a pong) for a whole interval is closed.
const PING_INTERVAL_SECS: u64 = 25;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let session = Arc::new(GatewaySession::open());

    // Subscribe before registering so nothing addressed to this connection
    // can be missed.
    let broadcast_rx = state.broadcast.subscribe();
    state.membership.connect(&session.connection_id);

    tracing::info!(
        connection_id = %session.connection_id,
        connections = state.registry.len(),
        "gateway connection established"
    );

    let (mut ws_tx, ws_rx) = socket.split();

    let connected = presence::connected(&session.connection_id);
    if send_event(&mut ws_tx, &session, connected.event, connected.data)
        .await
        .is_ok()
    {
        run_session(&state, &session, ws_tx, ws_rx, broadcast_rx).await;
    }

    // Disconnect cascade: leave the current room, drop pending requests.
    let uptime = state.registry.uptime(&session.connection_id);
    let mut gone = Disconnect::default();
    state.broadcast.publish(|| {
        gone = state.membership.disconnect(&session.connection_id);
        presence::disconnected(&gone)
    });
    if let Some(departure) = &gone.departure {
        tracing::info!(
            connection_id = %session.connection_id,
            room = %departure.room,
            user = %departure.user,
            room_deleted = departure.room_deleted,
            new_owner = ?departure.new_owner,
            "member disconnected"
        );
    }

    tracing::info!(
        connection_id = %session.connection_id,
        uptime_secs = uptime.map(|d| d.as_secs()),
        withdrawn_requests = gone.withdrawn.len(),
        "gateway connection closed"
    );
}

/// Main session event loop: read client events, forward broadcasts, keep the
/// connection alive.
async fn run_session(
    state: &AppState,
    session: &GatewaySession,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut broadcast_rx: broadcast::Receiver<Arc<BroadcastPayload>>,
) {
    let mut ping_timer = time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_traffic = true;

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        got_traffic = true;
                        let replies = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => handle_event(state, &session.connection_id, &client_msg),
                            Err(_) => vec![presence::error(&ChatError::invalid_input("Invalid JSON"))],
                        };
                        if reply(&mut ws_tx, session, replies).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => got_traffic = true,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                }
            }

            // Broadcast event from the fanout hub.
            result = broadcast_rx.recv() => {
                match result {
                    Ok(payload) => {
                        if !session.is_addressed(&payload.audience) {
                            continue;
                        }
                        if send_event(&mut ws_tx, session, &payload.event_name, payload.data.clone())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            connection_id = %session.connection_id,
                            skipped = n,
                            "gateway connection lagged behind broadcast"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = ping_timer.tick() => {
                if !got_traffic {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        "ping timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Ping timeout").await;
                    break;
                }
                got_traffic = false;
                if ws_tx.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Write the caller's replies. Room events were already queued on the hub
/// by `handle_event`.
async fn reply(
    ws_tx: &mut WsSink,
    session: &GatewaySession,
    replies: Vec<Delivery>,
) -> Result<(), axum::Error> {
    for delivery in replies {
        send_event(ws_tx, session, delivery.event, delivery.data).await?;
    }
    Ok(())
}

async fn send_event(
    ws_tx: &mut WsSink,
    session: &GatewaySession,
    event_name: &str,
    data: Value,
) -> Result<(), axum::Error> {
    let msg = GatewayMessage::dispatch(event_name, session.next_seq(), data);
    let json = match serde_json::to_string(&msg) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(?e, event = event_name, "failed to encode gateway message");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
