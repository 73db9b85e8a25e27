//! Presence and broadcast rules: which connections hear about a state change.
//!
//! Every function here turns an outcome produced under the room store lock
//! into the list of events it causes. Audience events are queued on the hub
//! in the same turn as the change; replies go back to the calling session.

use parley_common::Timestamp;
use serde_json::{json, Value};

use crate::error::ChatError;
use crate::rooms::directory::RoomSummary;
use crate::rooms::membership::{Access, ChatMessage, JoinReply};
use crate::rooms::room::JoinRequest;
use crate::rooms::store::{
    Admission, AdmissionKind, Creation, Departure, Disconnect, JoinOutcome, Rejection, Withdrawn,
};

use super::events::EventName;
use super::fanout::Audience;

/// Reason attached to `joinRequestRejected`.
pub const REASON_REJECTED: &str = "rejected";
pub const REASON_EXPIRED: &str = "expired";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Written straight to the socket that sent the triggering event.
    Caller,
    Audience(Audience),
}

/// One event bound for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: Target,
    pub event: &'static str,
    pub data: Value,
}

impl Delivery {
    pub fn reply(event: &'static str, data: Value) -> Self {
        Self {
            target: Target::Caller,
            event,
            data,
        }
    }

    pub fn to(audience: Audience, event: &'static str, data: Value) -> Self {
        Self {
            target: Target::Audience(audience),
            event,
            data,
        }
    }
}

pub fn error(err: &ChatError) -> Delivery {
    Delivery::reply(EventName::ERROR, json!(err.body()))
}

pub fn room_exists(room: &str) -> Delivery {
    Delivery::reply(
        EventName::ROOM_EXISTS,
        json!({ "room": room, "message": format!("Room \"{room}\" already exists") }),
    )
}

/// `createRoom` succeeded.
pub fn created(creation: &Creation) -> Vec<Delivery> {
    let mut out = departed_opt(creation.previous.as_ref());
    let data = json!({ "room": creation.room, "owner": creation.owner });
    out.push(Delivery::reply(EventName::ROOM_CREATED, data.clone()));
    out.push(Delivery::to(
        Audience::EveryoneExcept(creation.connection_id.clone()),
        EventName::ROOM_CREATED,
        data,
    ));
    out
}

/// `requestJoinRoom` result.
pub fn join_requested(room: &str, reply: &JoinReply, lobby: &str) -> Vec<Delivery> {
    let mut out = lobby_created(reply, lobby);
    match &reply.outcome {
        JoinOutcome::Admitted(admission) => {
            out.push(Delivery::reply(
                EventName::JOIN_REQUEST_ACCEPTED,
                accepted_body(admission),
            ));
            out.extend(admitted(admission));
        }
        JoinOutcome::Pending {
            request,
            members,
            duplicate,
        } => {
            out.push(Delivery::reply(
                EventName::JOIN_REQUEST_SENT,
                json!({ "room": room, "user": request.user }),
            ));
            if !duplicate {
                out.push(Delivery::to(
                    Audience::Connections(members.clone()),
                    EventName::NEW_JOIN_REQUEST,
                    new_request_body(room, request),
                ));
            }
        }
    }
    out
}

/// `joinRoom` result: the caller gets the other members, the room a fresh
/// member list.
pub fn joined(room: &str, reply: &JoinReply, lobby: &str) -> Vec<Delivery> {
    let mut out = lobby_created(reply, lobby);
    match &reply.outcome {
        JoinOutcome::Admitted(admission) => {
            let others: Vec<&String> = admission
                .members
                .iter()
                .filter(|name| **name != admission.user)
                .collect();
            out.push(Delivery::reply(EventName::ROOM_USERS, json!(others)));
            out.extend(admitted(admission));
        }
        JoinOutcome::Pending { request, .. } => {
            // Only reachable for an empty room, which admits immediately;
            // report it the way requestJoinRoom does.
            out.push(Delivery::reply(
                EventName::JOIN_REQUEST_SENT,
                json!({ "room": room, "user": request.user }),
            ));
        }
    }
    out
}

/// `acceptJoinRequest` succeeded: the requester is told directly, the room
/// sees the new member.
pub fn accepted(admission: &Admission) -> Vec<Delivery> {
    let mut out = vec![Delivery::to(
        Audience::connection(&admission.connection_id),
        EventName::JOIN_REQUEST_ACCEPTED,
        accepted_body(admission),
    )];
    out.extend(admitted(admission));
    out
}

pub fn rejected(rejection: &Rejection) -> Vec<Delivery> {
    vec![
        Delivery::to(
            Audience::connection(&rejection.request.connection_id),
            EventName::JOIN_REQUEST_REJECTED,
            json!({
                "room": rejection.room,
                "user": rejection.request.user,
                "reason": REASON_REJECTED,
            }),
        ),
        queue_update(&rejection.room, &rejection.members, &rejection.queue),
    ]
}

/// Pending requests that timed out. The requester learns why; members get
/// the shorter queue.
pub fn expired(withdrawn: &[Withdrawn]) -> Vec<Delivery> {
    let mut out = Vec::new();
    for w in withdrawn {
        out.push(Delivery::to(
            Audience::connection(&w.request.connection_id),
            EventName::JOIN_REQUEST_REJECTED,
            json!({ "room": w.room, "user": w.request.user, "reason": REASON_EXPIRED }),
        ));
        out.push(queue_update(&w.room, &w.members, &w.queue));
    }
    out
}

pub fn access(access: &Access) -> Vec<Delivery> {
    match access {
        Access::Granted(admission) => {
            let mut out = vec![Delivery::reply(
                EventName::HAS_ACCESS,
                json!({ "room": admission.room, "user": admission.user }),
            )];
            out.extend(admitted(admission));
            out
        }
        Access::Denied { room, user } => vec![Delivery::reply(
            EventName::NO_ACCESS,
            json!({ "room": room, "user": user }),
        )],
    }
}

/// `leaveRoom`. Leaving without being in a room is acknowledged with a null
/// room.
pub fn left(departure: Option<&Departure>) -> Vec<Delivery> {
    let room = departure.map(|d| d.room.as_str());
    let mut out = vec![Delivery::reply(EventName::LEFT_ROOM, json!({ "room": room }))];
    out.extend(departed_opt(departure));
    out
}

/// Transport disconnect cascade.
pub fn disconnected(disconnect: &Disconnect) -> Vec<Delivery> {
    let mut out = departed_opt(disconnect.departure.as_ref());
    for w in &disconnect.withdrawn {
        out.push(queue_update(&w.room, &w.members, &w.queue));
    }
    out
}

pub fn message(msg: &ChatMessage) -> Delivery {
    Delivery::to(
        Audience::Connections(msg.recipients.clone()),
        EventName::SEND_MESSAGE,
        json!({
            "room": msg.room,
            "user": msg.user,
            "message": msg.message,
            "id": msg.connection_id,
            "timestamp": msg.timestamp,
        }),
    )
}

pub fn active_rooms(rooms: &[RoomSummary]) -> Delivery {
    Delivery::reply(EventName::ACTIVE_ROOMS, json!(rooms))
}

pub fn join_requests(room: &str, requests: &[JoinRequest]) -> Delivery {
    Delivery::reply(
        EventName::JOIN_REQUESTS,
        json!({ "room": room, "requests": requests }),
    )
}

pub fn room_users(users: &[String]) -> Delivery {
    Delivery::reply(EventName::ROOM_USERS, json!(users))
}

pub fn connected(connection_id: &str) -> Delivery {
    Delivery::reply(EventName::CONNECTED, json!({ "id": connection_id }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Room-side effects of an admission.
fn admitted(admission: &Admission) -> Vec<Delivery> {
    let mut out = departed_opt(admission.previous.as_ref());

    if matches!(admission.kind, AdmissionKind::Auto | AdmissionKind::Accepted) {
        out.push(Delivery::to(
            Audience::connections_except(&admission.recipients, &admission.connection_id),
            EventName::USER_JOINED_ROOM,
            json!({
                "user": admission.user,
                "room": admission.room,
                "timestamp": Timestamp::now(),
            }),
        ));
    }
    out.push(users_update(&admission.recipients, &admission.members));

    if let Some(queue) = &admission.queue {
        out.push(queue_update(&admission.room, &admission.recipients, queue));
    }
    out
}

fn departed_opt(departure: Option<&Departure>) -> Vec<Delivery> {
    departure.map(departed).unwrap_or_default()
}

fn departed(departure: &Departure) -> Vec<Delivery> {
    let mut out = Vec::new();
    if !departure.remaining.is_empty() {
        out.push(Delivery::to(
            Audience::Connections(departure.remaining.clone()),
            EventName::USER_LEFT_ROOM,
            json!({
                "user": departure.user,
                "room": departure.room,
                "timestamp": Timestamp::now(),
            }),
        ));
        out.push(users_update(&departure.remaining, &departure.members));
        if let Some(owner) = &departure.new_owner {
            out.push(Delivery::to(
                Audience::Connections(departure.remaining.clone()),
                EventName::ROOM_OWNER_CHANGED,
                json!({ "room": departure.room, "owner": owner }),
            ));
        }
    }
    if departure.room_deleted {
        out.push(Delivery::to(
            Audience::Everyone,
            EventName::ROOM_DELETED,
            json!({ "room": departure.room }),
        ));
    }
    out
}

fn lobby_created(reply: &JoinReply, lobby: &str) -> Vec<Delivery> {
    if !reply.lobby_created {
        return Vec::new();
    }
    let owner = match &reply.outcome {
        JoinOutcome::Admitted(admission) => admission.owner.clone(),
        JoinOutcome::Pending { .. } => None,
    };
    vec![Delivery::to(
        Audience::Everyone,
        EventName::ROOM_CREATED,
        json!({ "room": lobby, "owner": owner }),
    )]
}

fn users_update(recipients: &[String], members: &[String]) -> Delivery {
    Delivery::to(
        Audience::Connections(recipients.to_vec()),
        EventName::ROOM_USERS_UPDATE,
        json!(members),
    )
}

fn queue_update(room: &str, members: &[String], queue: &[JoinRequest]) -> Delivery {
    Delivery::to(
        Audience::Connections(members.to_vec()),
        EventName::JOIN_REQUESTS,
        json!({ "room": room, "requests": queue }),
    )
}

fn accepted_body(admission: &Admission) -> Value {
    json!({
        "room": admission.room,
        "user": admission.user,
        "owner": admission.owner,
    })
}

fn new_request_body(room: &str, request: &JoinRequest) -> Value {
    json!({
        "room": room,
        "user": request.user,
        "socketId": request.connection_id,
        "timestamp": request.requested_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admission(kind: AdmissionKind) -> Admission {
        Admission {
            kind,
            room: "Alpha".into(),
            user: "Bob".into(),
            connection_id: "c-bob".into(),
            owner: Some("Amy".into()),
            recipients: vec!["c-amy".into(), "c-bob".into()],
            members: vec!["Amy".into(), "Bob".into()],
            evicted: None,
            previous: None,
            queue: Some(vec![]),
        }
    }

    fn departure(remaining: &[&str], new_owner: Option<&str>, deleted: bool) -> Departure {
        Departure {
            room: "Alpha".into(),
            user: "Amy".into(),
            connection_id: "c-amy".into(),
            remaining: remaining.iter().map(|s| s.to_string()).collect(),
            members: remaining.iter().map(|_| "Bob".to_string()).collect(),
            new_owner: new_owner.map(str::to_string),
            room_deleted: deleted,
        }
    }

    fn events(deliveries: &[Delivery]) -> Vec<&'static str> {
        deliveries.iter().map(|d| d.event).collect()
    }

    #[test]
    fn accepted_notifies_requester_then_room() {
        let out = accepted(&admission(AdmissionKind::Accepted));
        assert_eq!(
            events(&out),
            vec![
                EventName::JOIN_REQUEST_ACCEPTED,
                EventName::USER_JOINED_ROOM,
                EventName::ROOM_USERS_UPDATE,
                EventName::JOIN_REQUESTS,
            ]
        );
        assert_eq!(out[0].target, Target::Audience(Audience::connection("c-bob")));
        // The joiner is not told about itself joining.
        assert_eq!(
            out[1].target,
            Target::Audience(Audience::Connections(vec!["c-amy".into()]))
        );
    }

    #[test]
    fn rebinding_does_not_announce_a_join() {
        let mut a = admission(AdmissionKind::Rebound);
        a.queue = None;
        let out = admitted(&a);
        assert_eq!(events(&out), vec![EventName::ROOM_USERS_UPDATE]);
    }

    #[test]
    fn owner_departure_announces_new_owner() {
        let out = departed(&departure(&["c-bob"], Some("Bob"), false));
        assert_eq!(
            events(&out),
            vec![
                EventName::USER_LEFT_ROOM,
                EventName::ROOM_USERS_UPDATE,
                EventName::ROOM_OWNER_CHANGED,
            ]
        );
        assert_eq!(out[2].data, json!({ "room": "Alpha", "owner": "Bob" }));
    }

    #[test]
    fn last_member_leaving_deletes_for_everyone() {
        let out = departed(&departure(&[], None, true));
        assert_eq!(events(&out), vec![EventName::ROOM_DELETED]);
        assert_eq!(out[0].target, Target::Audience(Audience::Everyone));
    }

    #[test]
    fn empty_lobby_departure_is_silent() {
        assert!(departed(&departure(&[], None, false)).is_empty());
    }

    #[test]
    fn created_replies_and_announces() {
        let out = created(&Creation {
            room: "Alpha".into(),
            owner: "Amy".into(),
            connection_id: "c-amy".into(),
            previous: None,
        });
        assert_eq!(out[0].target, Target::Caller);
        assert_eq!(
            out[1].target,
            Target::Audience(Audience::EveryoneExcept("c-amy".into()))
        );
        assert_eq!(out[1].data, json!({ "room": "Alpha", "owner": "Amy" }));
    }

    #[test]
    fn error_delivery_carries_code() {
        let out = error(&ChatError::RoomNotFound("Nowhere".into()));
        assert_eq!(out.event, EventName::ERROR);
        assert_eq!(out.data["code"], "ROOM_NOT_FOUND");
    }

    #[test]
    fn leaving_without_a_room_is_acknowledged() {
        let out = left(None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, json!({ "room": null }));
    }
}
