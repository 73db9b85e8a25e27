//! Dispatch of client events to membership operations.

use crate::error::{ChatError, ChatResult};
use crate::rooms::store::JoinOutcome;
use crate::AppState;

use super::events::{
    required, AcceptJoinPayload, ClientEvent, ClientMessage, CreateRoomPayload, MessagePayload,
    RejectJoinPayload, RoomPayload, RoomUserPayload,
};
use super::presence::{self, Delivery};

/// Handle one client event. Events for other connections are on the hub
/// before this returns; the caller's replies are handed back to be written.
/// Failures become an `error` reply and the connection stays open.
pub fn handle_event(state: &AppState, connection_id: &str, msg: &ClientMessage) -> Vec<Delivery> {
    state.broadcast.sequenced(|| match dispatch(state, connection_id, msg) {
        Ok(deliveries) => deliveries,
        Err(err) => {
            tracing::debug!(
                connection_id = %connection_id,
                event = %msg.event,
                code = err.code(),
                error = %err,
                "event rejected"
            );
            vec![presence::error(&err)]
        }
    })
}

fn dispatch(state: &AppState, connection_id: &str, msg: &ClientMessage) -> ChatResult<Vec<Delivery>> {
    match msg.event.as_str() {
        ClientEvent::CREATE_ROOM => create_room(state, connection_id, msg.payload()?),
        ClientEvent::REQUEST_JOIN_ROOM => request_join_room(state, connection_id, msg.payload()?),
        ClientEvent::ACCEPT_JOIN_REQUEST => accept_join_request(state, connection_id, msg.payload()?),
        ClientEvent::REJECT_JOIN_REQUEST => reject_join_request(state, connection_id, msg.payload()?),
        ClientEvent::JOIN_ROOM => join_room(state, connection_id, msg.payload()?),
        ClientEvent::LEAVE_ROOM => Ok(leave_room(state, connection_id)),
        ClientEvent::GET_JOIN_REQUESTS => get_join_requests(state, msg.payload()?),
        ClientEvent::GET_ACTIVE_ROOMS => Ok(vec![presence::active_rooms(
            &state.membership.active_rooms(),
        )]),
        ClientEvent::GET_ROOM_USERS => get_room_users(state, connection_id, msg.payload()?),
        ClientEvent::CHECK_ACCESS => check_access(state, connection_id, msg.payload()?),
        ClientEvent::MESSAGE => Ok(message(state, connection_id, msg.payload()?)),
        other => Err(ChatError::invalid_input(format!("Unknown event \"{other}\""))),
    }
}

fn create_room(state: &AppState, connection_id: &str, payload: CreateRoomPayload) -> ChatResult<Vec<Delivery>> {
    let room = required(payload.name, "room")?;
    let owner = required(payload.owner_name, "user")?;

    match state.membership.create_room(connection_id, &room, &owner) {
        Ok(creation) => {
            tracing::info!(connection_id = %connection_id, room = %room, user = %owner, "room created");
            Ok(presence::created(&creation))
        }
        Err(ChatError::RoomExists(room)) => Ok(vec![presence::room_exists(&room)]),
        Err(err) => Err(err),
    }
}

fn request_join_room(state: &AppState, connection_id: &str, payload: RoomUserPayload) -> ChatResult<Vec<Delivery>> {
    let room = required(payload.room, "room")?;
    let user = required(payload.user, "user")?;

    let reply = state.membership.request_join(connection_id, &room, &user)?;
    tracing::info!(
        connection_id = %connection_id,
        room = %room,
        user = %user,
        outcome = outcome_label(&reply.outcome),
        "join requested"
    );
    Ok(presence::join_requested(&room, &reply, &state.config.lobby_room))
}

fn accept_join_request(
    state: &AppState,
    connection_id: &str,
    payload: AcceptJoinPayload,
) -> ChatResult<Vec<Delivery>> {
    let room = required(payload.room, "room")?;
    let requestor = required(payload.requesting_user, "requestingUser")?;
    let hint = payload
        .requesting_socket_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    let admission = state
        .membership
        .accept_join(connection_id, &room, &requestor, hint.as_deref())?;
    tracing::info!(
        connection_id = %connection_id,
        room = %room,
        user = %requestor,
        policy = ?state.membership.policy(),
        "join request accepted"
    );
    Ok(presence::accepted(&admission))
}

fn reject_join_request(
    state: &AppState,
    connection_id: &str,
    payload: RejectJoinPayload,
) -> ChatResult<Vec<Delivery>> {
    let room = required(payload.room, "room")?;
    let requestor = required(payload.requesting_user, "requestingUser")?;

    let rejection = state.membership.reject_join(connection_id, &room, &requestor)?;
    tracing::info!(
        connection_id = %connection_id,
        room = %room,
        user = %requestor,
        policy = ?state.membership.policy(),
        "join request rejected"
    );
    Ok(presence::rejected(&rejection))
}

fn join_room(state: &AppState, connection_id: &str, payload: RoomUserPayload) -> ChatResult<Vec<Delivery>> {
    let room = required(payload.room, "room")?;
    let user = required(payload.user, "user")?;

    let reply = state.membership.join_room(connection_id, &room, &user)?;
    Ok(presence::joined(&room, &reply, &state.config.lobby_room))
}

fn leave_room(state: &AppState, connection_id: &str) -> Vec<Delivery> {
    let departure = state.membership.leave(connection_id);
    if let Some(d) = &departure {
        tracing::info!(connection_id = %connection_id, room = %d.room, user = %d.user, "left room");
    }
    presence::left(departure.as_ref())
}

fn get_join_requests(state: &AppState, payload: RoomPayload) -> ChatResult<Vec<Delivery>> {
    let room = required(payload.room, "room")?;
    let requests = state.membership.join_requests(&room);
    Ok(vec![presence::join_requests(&room, &requests)])
}

fn get_room_users(state: &AppState, connection_id: &str, payload: RoomPayload) -> ChatResult<Vec<Delivery>> {
    let room = required(payload.room, "room")?;
    let users = state.membership.room_users(connection_id, &room);
    Ok(vec![presence::room_users(&users)])
}

fn check_access(state: &AppState, connection_id: &str, payload: RoomUserPayload) -> ChatResult<Vec<Delivery>> {
    let room = required(payload.room, "room")?;
    let user = required(payload.user, "user")?;
    let access = state.membership.check_access(connection_id, &room, &user);
    Ok(presence::access(&access))
}

/// Messages from non-members and blank messages are dropped without a reply.
fn message(state: &AppState, connection_id: &str, payload: MessagePayload) -> Vec<Delivery> {
    let Some(text) = payload.message else {
        return Vec::new();
    };
    match state.membership.send_message(connection_id, &text) {
        Some(msg) => vec![presence::message(&msg)],
        None => {
            tracing::debug!(connection_id = %connection_id, "message dropped");
            Vec::new()
        }
    }
}

fn outcome_label(outcome: &JoinOutcome) -> &'static str {
    match outcome {
        JoinOutcome::Admitted(_) => "admitted",
        JoinOutcome::Pending { duplicate: true, .. } => "duplicate",
        JoinOutcome::Pending { .. } => "pending",
    }
}
