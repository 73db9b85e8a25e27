//! Event names and wire-format messages.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatError, ChatResult};

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub event: String,
    /// Per-connection sequence number, starting at 1.
    pub seq: u64,
    pub data: Value,
}

impl GatewayMessage {
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            event: event_name.to_string(),
            seq,
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientMessage {
    /// Decode `data` into an event payload. A missing or `null` payload
    /// decodes as the payload's default (all fields absent).
    pub fn payload<T: DeserializeOwned + Default>(&self) -> ChatResult<T> {
        if self.data.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.data.clone()).map_err(|err| {
            ChatError::invalid_input(format!("Malformed {} payload: {err}", self.event))
        })
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `createRoom`. Accepts `{name, ownerName}` as well as `{room, user}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomPayload {
    #[serde(default, alias = "room")]
    pub name: Option<String>,
    #[serde(default, alias = "user")]
    pub owner_name: Option<String>,
}

/// `requestJoinRoom`, `joinRoom`, `checkAccess`.
#[derive(Debug, Default, Deserialize)]
pub struct RoomUserPayload {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptJoinPayload {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub requesting_user: Option<String>,
    #[serde(default)]
    pub requesting_socket_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectJoinPayload {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub requesting_user: Option<String>,
}

/// `getJoinRequests`, `getRoomUsers`.
#[derive(Debug, Default, Deserialize)]
pub struct RoomPayload {
    #[serde(default)]
    pub room: Option<String>,
}

/// `message`. The sender is identified by its connection; any `id` or
/// `user` field a client adds is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub message: Option<String>,
}

/// Trimmed, non-empty value of a required field.
pub fn required(value: Option<String>, field: &str) -> ChatResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ChatError::invalid_input(format!("{field} is required")))
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Events accepted from clients.
pub struct ClientEvent;

impl ClientEvent {
    pub const CREATE_ROOM: &'static str = "createRoom";
    pub const REQUEST_JOIN_ROOM: &'static str = "requestJoinRoom";
    pub const ACCEPT_JOIN_REQUEST: &'static str = "acceptJoinRequest";
    pub const REJECT_JOIN_REQUEST: &'static str = "rejectJoinRequest";
    pub const JOIN_ROOM: &'static str = "joinRoom";
    pub const LEAVE_ROOM: &'static str = "leaveRoom";
    pub const GET_JOIN_REQUESTS: &'static str = "getJoinRequests";
    pub const GET_ACTIVE_ROOMS: &'static str = "getActiveRooms";
    pub const GET_ROOM_USERS: &'static str = "getRoomUsers";
    pub const CHECK_ACCESS: &'static str = "checkAccess";
    pub const MESSAGE: &'static str = "message";
}

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const CONNECTED: &'static str = "connected";
    pub const ROOM_CREATED: &'static str = "roomCreated";
    pub const ROOM_EXISTS: &'static str = "roomExists";
    pub const ROOM_DELETED: &'static str = "roomDeleted";
    pub const JOIN_REQUEST_SENT: &'static str = "joinRequestSent";
    pub const JOIN_REQUEST_ACCEPTED: &'static str = "joinRequestAccepted";
    pub const JOIN_REQUEST_REJECTED: &'static str = "joinRequestRejected";
    pub const NEW_JOIN_REQUEST: &'static str = "newJoinRequest";
    pub const JOIN_REQUESTS: &'static str = "joinRequests";
    pub const USER_JOINED_ROOM: &'static str = "userJoinedRoom";
    pub const USER_LEFT_ROOM: &'static str = "userLeftRoom";
    pub const ROOM_OWNER_CHANGED: &'static str = "roomOwnerChanged";
    pub const ROOM_USERS_UPDATE: &'static str = "roomUsersUpdate";
    pub const ROOM_USERS: &'static str = "roomUsers";
    pub const ACTIVE_ROOMS: &'static str = "activeRooms";
    pub const HAS_ACCESS: &'static str = "hasAccess";
    pub const NO_ACCESS: &'static str = "noAccess";
    pub const LEFT_ROOM: &'static str = "leftRoom";
    pub const SEND_MESSAGE: &'static str = "sendMessage";
    pub const ERROR: &'static str = "error";
}
