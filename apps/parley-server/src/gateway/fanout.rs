//! Broadcast hub for dispatching events to connected sessions.
//!
//! Uses a single `tokio::sync::broadcast` channel. Every payload carries the
//! exact set of connections it is meant for, computed while the room store
//! was locked; each session subscribes once and filters locally. Delivery is
//! best-effort: a connection that is gone by the time a payload arrives
//! simply never sees it.
//!
//! State changes run through [`GatewayBroadcast::sequenced`], so payloads
//! enter the channel in the same order as the changes that produced them.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use super::presence::{Delivery, Target};

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

/// Who a broadcast payload is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connected client, whatever room it is in.
    Everyone,
    /// Every connected client but one.
    EveryoneExcept(String),
    /// Exactly these connections.
    Connections(Vec<String>),
}

impl Audience {
    pub fn connection(connection_id: &str) -> Self {
        Self::Connections(vec![connection_id.to_string()])
    }

    /// `connections` minus `excluded`.
    pub fn connections_except(connections: &[String], excluded: &str) -> Self {
        Self::Connections(
            connections
                .iter()
                .filter(|conn| conn.as_str() != excluded)
                .cloned()
                .collect(),
        )
    }

    pub fn includes(&self, connection_id: &str) -> bool {
        match self {
            Self::Everyone => true,
            Self::EveryoneExcept(excluded) => excluded != connection_id,
            Self::Connections(connections) => connections.iter().any(|c| c == connection_id),
        }
    }

    /// Whether nobody could possibly receive the payload.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Connections(connections) if connections.is_empty())
    }
}

/// A payload broadcast to all connected gateway sessions.
#[derive(Debug, Clone)]
pub struct BroadcastPayload {
    pub audience: Audience,
    /// The dispatch event name (e.g. "sendMessage").
    pub event_name: String,
    pub data: Value,
}

/// The global broadcast hub, stored in AppState behind an `Arc`.
pub struct GatewayBroadcast {
    sender: broadcast::Sender<Arc<BroadcastPayload>>,
    /// Held from the start of a state change until its events are queued.
    /// Always taken before the room store lock.
    order: Mutex<()>,
}

impl Default for GatewayBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            sender,
            order: Mutex::new(()),
        }
    }

    /// Subscribe to the broadcast channel. Each gateway session should call
    /// this once to get its own receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastPayload>> {
        self.sender.subscribe()
    }

    /// Dispatch an event to the sessions in `payload.audience`.
    pub fn dispatch(&self, payload: BroadcastPayload) {
        if payload.audience.is_empty() {
            return;
        }
        // send() returns Err if there are no receivers; nothing to do.
        let _ = self.sender.send(Arc::new(payload));
    }

    /// Run a state change and queue its audience events before any other
    /// change can start. Returns the replies meant for the caller, which the
    /// session writes after the lock is released.
    pub fn sequenced(&self, change: impl FnOnce() -> Vec<Delivery>) -> Vec<Delivery> {
        let _turn = self.order.lock();
        let mut replies = Vec::new();
        for delivery in change() {
            match delivery.target {
                Target::Caller => replies.push(delivery),
                Target::Audience(audience) => self.dispatch(BroadcastPayload {
                    audience,
                    event_name: delivery.event.to_string(),
                    data: delivery.data,
                }),
            }
        }
        replies
    }

    /// Like [`sequenced`](Self::sequenced), for changes with no caller to
    /// answer (disconnects, expiry).
    pub fn publish(&self, change: impl FnOnce() -> Vec<Delivery>) {
        for reply in self.sequenced(change) {
            tracing::warn!(event = reply.event, "dropping reply with no caller");
        }
    }
}
