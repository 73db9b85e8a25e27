//! Authoritative room state.
//!
//! [`Rooms`] implements the room operations on plain `&mut self`; [`RoomStore`]
//! wraps it in a single `parking_lot::Mutex` so every operation (and every
//! multi-step protocol built from them) runs to completion before the next
//! one observes the state. Each operation returns an outcome describing who
//! has to be told what; the gateway queues those events before the next
//! change can start.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use parley_common::Timestamp;

use crate::config::JoinPolicy;
use crate::error::{ChatError, ChatResult};
use crate::gateway::registry::ConnectionRegistry;

use super::directory::{self, RoomSummary};
use super::room::{JoinRequest, QueuedRequest, Room};

/// A member left a room (disconnect, explicit leave, or moving elsewhere).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room: String,
    pub user: String,
    pub connection_id: String,
    /// Connections still in the room.
    pub remaining: Vec<String>,
    /// Names still in the room.
    pub members: Vec<String>,
    /// Set when the departing member owned the room and someone took over.
    pub new_owner: Option<String>,
    /// The room emptied and was deleted.
    pub room_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionKind {
    /// The room was empty; the joiner walked in and owns it.
    Auto,
    /// A member accepted a pending request.
    Accepted,
    /// A name already holding membership came back on a new connection.
    Rebound,
    /// The connection already was that member; nothing changed.
    Confirmed,
}

/// A connection became (or was confirmed as) a member of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub kind: AdmissionKind,
    pub room: String,
    pub user: String,
    pub connection_id: String,
    pub owner: Option<String>,
    /// Every member connection after admission, the new one included.
    pub recipients: Vec<String>,
    pub members: Vec<String>,
    /// Stale connection id replaced by this admission.
    pub evicted: Option<String>,
    /// Room the connection had to leave first.
    pub previous: Option<Departure>,
    /// Pending queue after the admission, if the admission resolved a request.
    pub queue: Option<Vec<JoinRequest>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creation {
    pub room: String,
    pub owner: String,
    pub connection_id: String,
    pub previous: Option<Departure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Admitted(Admission),
    Pending {
        request: JoinRequest,
        /// Member connections to notify.
        members: Vec<String>,
        /// A request from this name was already queued.
        duplicate: bool,
    },
}

/// A pending request was turned down by a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub room: String,
    pub request: JoinRequest,
    pub members: Vec<String>,
    pub queue: Vec<JoinRequest>,
}

/// A pending request disappeared without a decision (requester disconnect or
/// expiry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawn {
    pub room: String,
    pub request: JoinRequest,
    pub members: Vec<String>,
    pub queue: Vec<JoinRequest>,
}

/// Everything a disconnect changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disconnect {
    pub departure: Option<Departure>,
    pub withdrawn: Vec<Withdrawn>,
}

/// All rooms, keyed by case-sensitive name.
pub struct Rooms {
    rooms: HashMap<String, Room>,
    registry: ConnectionRegistry,
    lobby: String,
}

impl Rooms {
    pub fn new(lobby: &str, registry: ConnectionRegistry) -> Self {
        Self {
            rooms: HashMap::new(),
            registry,
            lobby: lobby.to_string(),
        }
    }

    pub fn lobby(&self) -> &str {
        &self.lobby
    }

    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    /// Make sure the lobby exists. Returns true if this call created it.
    pub fn ensure_lobby(&mut self) -> bool {
        if self.rooms.contains_key(&self.lobby) {
            return false;
        }
        self.rooms
            .insert(self.lobby.clone(), Room::empty(&self.lobby, Timestamp::now()));
        true
    }

    pub fn create_room(&mut self, name: &str, owner: &str, connection_id: &str) -> ChatResult<Creation> {
        if self.rooms.contains_key(name) {
            return Err(ChatError::RoomExists(name.to_string()));
        }

        let previous = self.leave_current(connection_id);
        self.rooms.insert(
            name.to_string(),
            Room::new(name, owner, connection_id, Timestamp::now()),
        );
        self.registry.associate(connection_id, name);

        Ok(Creation {
            room: name.to_string(),
            owner: owner.to_string(),
            connection_id: connection_id.to_string(),
            previous,
        })
    }

    /// Ask to enter a room. Empty rooms admit immediately and hand over
    /// ownership; otherwise the request is queued (once per name).
    pub fn request_join(&mut self, room_name: &str, user: &str, connection_id: &str) -> ChatResult<JoinOutcome> {
        if room_name == self.lobby {
            self.ensure_lobby();
        }

        let room = self
            .rooms
            .get_mut(room_name)
            .ok_or_else(|| ChatError::RoomNotFound(room_name.to_string()))?;

        if room.has_member_named(user) {
            return Err(ChatError::AlreadyMember {
                room: room_name.to_string(),
                user: user.to_string(),
            });
        }

        if room.is_empty() {
            return self
                .admit(room_name, user, connection_id, AdmissionKind::Auto, false)
                .map(JoinOutcome::Admitted);
        }

        let members = room.connection_ids();
        Ok(match room.queue_request(user, connection_id, Timestamp::now()) {
            QueuedRequest::New(request) => JoinOutcome::Pending {
                request,
                members,
                duplicate: false,
            },
            QueuedRequest::Duplicate(request) => JoinOutcome::Pending {
                request,
                members,
                duplicate: true,
            },
        })
    }

    /// Accept `requestor`'s pending request on behalf of `accepting_connection`.
    ///
    /// The connection admitted is the one recorded on the request (the latest
    /// one that asked under that name); `connection_hint` is only used if that
    /// one has since gone away.
    pub fn accept_join(
        &mut self,
        room_name: &str,
        requestor: &str,
        connection_hint: Option<&str>,
        accepting_connection: &str,
        policy: JoinPolicy,
    ) -> ChatResult<Admission> {
        let room = self
            .rooms
            .get_mut(room_name)
            .ok_or_else(|| ChatError::RoomNotFound(room_name.to_string()))?;

        let accepter = room
            .name_of(accepting_connection)
            .ok_or_else(|| ChatError::NotInRoom(room_name.to_string()))?;
        if policy == JoinPolicy::OwnerOnly && !room.is_owner(accepter) {
            return Err(ChatError::unauthorized(
                "Only the room owner can accept join requests",
            ));
        }

        let not_found = || ChatError::RequestNotFound {
            room: room_name.to_string(),
            user: requestor.to_string(),
        };
        let request = room.request_from(requestor).ok_or_else(not_found)?;

        let connection_id = if self.registry.is_live(&request.connection_id) {
            request.connection_id.clone()
        } else if let Some(hint) = connection_hint.filter(|hint| self.registry.is_live(hint)) {
            hint.to_string()
        } else {
            room.take_request(requestor);
            return Err(not_found());
        };

        // The request stays queued if the connection already sits in this
        // room under another name.
        if let Some(existing) = room.name_of(&connection_id).filter(|name| *name != requestor) {
            return Err(ChatError::AlreadyMember {
                room: room_name.to_string(),
                user: existing.to_string(),
            });
        }

        self.admit(room_name, requestor, &connection_id, AdmissionKind::Accepted, true)
    }

    pub fn reject_join(
        &mut self,
        room_name: &str,
        requestor: &str,
        rejecting_connection: &str,
        policy: JoinPolicy,
    ) -> ChatResult<Rejection> {
        let room = self
            .rooms
            .get_mut(room_name)
            .ok_or_else(|| ChatError::RoomNotFound(room_name.to_string()))?;

        let rejecter = room
            .name_of(rejecting_connection)
            .ok_or_else(|| ChatError::NotInRoom(room_name.to_string()))?;
        if policy == JoinPolicy::OwnerOnly && !room.is_owner(rejecter) {
            return Err(ChatError::unauthorized(
                "Only the room owner can reject join requests",
            ));
        }

        let request = room.take_request(requestor).ok_or_else(|| ChatError::RequestNotFound {
            room: room_name.to_string(),
            user: requestor.to_string(),
        })?;

        Ok(Rejection {
            room: room_name.to_string(),
            request,
            members: room.connection_ids(),
            queue: room.requests().to_vec(),
        })
    }

    /// Re-attach `user`'s existing membership to `connection_id`.
    pub fn rebind_member(&mut self, room_name: &str, user: &str, connection_id: &str) -> ChatResult<Admission> {
        let room = self
            .rooms
            .get(room_name)
            .ok_or_else(|| ChatError::RoomNotFound(room_name.to_string()))?;
        let current = room
            .connection_of(user)
            .ok_or_else(|| ChatError::NotInRoom(room_name.to_string()))?;

        if current == connection_id {
            return Ok(Admission {
                kind: AdmissionKind::Confirmed,
                room: room_name.to_string(),
                user: user.to_string(),
                connection_id: connection_id.to_string(),
                owner: room.owner.clone(),
                recipients: room.connection_ids(),
                members: room.member_names(),
                evicted: None,
                previous: None,
                queue: None,
            });
        }

        self.admit(room_name, user, connection_id, AdmissionKind::Rebound, false)
    }

    /// Remove a connection from a room. Transfers ownership if the owner left
    /// and others remain; deletes the room if it emptied (unless it is the
    /// lobby).
    pub fn remove_member(&mut self, room_name: &str, connection_id: &str) -> Option<Departure> {
        let room = self.rooms.get_mut(room_name)?;
        let user = room.remove_member(connection_id)?;

        if self.registry.room_of(connection_id).as_deref() == Some(room_name) {
            self.registry.unassociate(connection_id);
        }

        let new_owner = if room.is_owner(&user) && !room.is_empty() {
            room.reassign_owner()
        } else {
            None
        };

        let mut room_deleted = false;
        if room.is_empty() {
            if room_name == self.lobby {
                room.owner = None;
            } else {
                room_deleted = true;
            }
        }

        let departure = Departure {
            room: room_name.to_string(),
            user,
            connection_id: connection_id.to_string(),
            remaining: room.connection_ids(),
            members: room.member_names(),
            new_owner,
            room_deleted,
        };

        if room_deleted {
            self.rooms.remove(room_name);
        }
        Some(departure)
    }

    /// Remove a connection from whatever room it is in.
    pub fn leave_current(&mut self, connection_id: &str) -> Option<Departure> {
        let room = self.registry.room_of(connection_id)?;
        self.remove_member(&room, connection_id)
    }

    /// Tear down everything a closed connection held: its membership and any
    /// join requests that would have admitted it. Forgets the connection.
    pub fn disconnect(&mut self, connection_id: &str) -> Disconnect {
        let departure = self.leave_current(connection_id);

        let mut withdrawn = Vec::new();
        for room in self.rooms.values_mut() {
            for request in room.drop_requests_from(connection_id) {
                withdrawn.push(Withdrawn {
                    room: room.name.clone(),
                    request,
                    members: room.connection_ids(),
                    queue: room.requests().to_vec(),
                });
            }
        }

        self.registry.deregister(connection_id);
        Disconnect {
            departure,
            withdrawn,
        }
    }

    /// Drop pending requests older than `ttl` as of `now`.
    pub fn expire_requests(&mut self, ttl: Duration, now: Timestamp) -> Vec<Withdrawn> {
        let mut expired = Vec::new();
        for room in self.rooms.values_mut() {
            let dropped = room.drop_requests_where(|r| r.requested_at.elapsed_until(now) >= ttl);
            for request in dropped {
                expired.push(Withdrawn {
                    room: room.name.clone(),
                    request,
                    members: room.connection_ids(),
                    queue: room.requests().to_vec(),
                });
            }
        }
        expired
    }

    /// The room and name a connection is a member under, re-validated against
    /// the room itself.
    pub fn membership_of(&self, connection_id: &str) -> Option<(&Room, String)> {
        let room_name = self.registry.room_of(connection_id)?;
        let room = self.rooms.get(&room_name)?;
        let user = room.name_of(connection_id)?.to_string();
        Some((room, user))
    }

    pub fn pending_requests(&self, room_name: &str) -> Vec<JoinRequest> {
        self.rooms
            .get(room_name)
            .map(|room| room.requests().to_vec())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room_name: &str, user: &str) -> bool {
        self.rooms
            .get(room_name)
            .is_some_and(|room| room.has_member_named(user))
    }

    pub fn list_active(&self) -> Vec<RoomSummary> {
        directory::snapshot(self.rooms.values())
    }

    fn admit(
        &mut self,
        room_name: &str,
        user: &str,
        connection_id: &str,
        kind: AdmissionKind,
        request_resolved: bool,
    ) -> ChatResult<Admission> {
        let previous = match self.registry.room_of(connection_id) {
            Some(current) if current != room_name => self.remove_member(&current, connection_id),
            _ => None,
        };

        let room = self
            .rooms
            .get_mut(room_name)
            .ok_or_else(|| ChatError::RoomNotFound(room_name.to_string()))?;

        if let Some(existing) = room.name_of(connection_id).filter(|name| *name != user) {
            return Err(ChatError::AlreadyMember {
                room: room_name.to_string(),
                user: existing.to_string(),
            });
        }

        let evicted = room.insert_member(connection_id, user);
        if kind == AdmissionKind::Auto {
            room.owner = Some(user.to_string());
        }
        let request_resolved = room.take_request(user).is_some() || request_resolved;

        if let Some(stale) = evicted.as_deref() {
            if self.registry.room_of(stale).as_deref() == Some(room_name) {
                self.registry.unassociate(stale);
            }
        }
        self.registry.associate(connection_id, room_name);

        Ok(Admission {
            kind,
            room: room_name.to_string(),
            user: user.to_string(),
            connection_id: connection_id.to_string(),
            owner: room.owner.clone(),
            recipients: room.connection_ids(),
            members: room.member_names(),
            evicted,
            previous,
            queue: request_resolved.then(|| room.requests().to_vec()),
        })
    }
}

/// The room store: [`Rooms`] behind one lock.
pub struct RoomStore {
    state: Mutex<Rooms>,
}

impl RoomStore {
    pub fn new(lobby: &str, registry: ConnectionRegistry) -> Self {
        Self {
            state: Mutex::new(Rooms::new(lobby, registry)),
        }
    }

    /// Run `f` with exclusive access to every room. Must not block.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut Rooms) -> R) -> R {
        let mut rooms = self.state.lock();
        f(&mut rooms)
    }

    pub fn ensure_lobby(&self) -> bool {
        self.transaction(Rooms::ensure_lobby)
    }

    pub fn create_room(&self, name: &str, owner: &str, connection_id: &str) -> ChatResult<Creation> {
        self.transaction(|rooms| rooms.create_room(name, owner, connection_id))
    }

    pub fn request_join(&self, room: &str, user: &str, connection_id: &str) -> ChatResult<JoinOutcome> {
        self.transaction(|rooms| rooms.request_join(room, user, connection_id))
    }

    pub fn accept_join(
        &self,
        room: &str,
        requestor: &str,
        connection_hint: Option<&str>,
        accepting_connection: &str,
        policy: JoinPolicy,
    ) -> ChatResult<Admission> {
        self.transaction(|rooms| {
            rooms.accept_join(room, requestor, connection_hint, accepting_connection, policy)
        })
    }

    pub fn reject_join(
        &self,
        room: &str,
        requestor: &str,
        rejecting_connection: &str,
        policy: JoinPolicy,
    ) -> ChatResult<Rejection> {
        self.transaction(|rooms| rooms.reject_join(room, requestor, rejecting_connection, policy))
    }

    pub fn remove_member(&self, room: &str, connection_id: &str) -> Option<Departure> {
        self.transaction(|rooms| rooms.remove_member(room, connection_id))
    }

    pub fn list_active(&self) -> Vec<RoomSummary> {
        self.transaction(|rooms| rooms.list_active())
    }
}
