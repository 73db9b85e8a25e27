//! Membership protocol: the request/response sequence clients observe.
//!
//! Composes [`Rooms`](super::store::Rooms) operations inside one store
//! transaction wherever a decision depends on state read in the same step
//! (reconnect re-admission, `joinRoom` repair, message authorship), so no
//! decision is made on state another handler could have changed in between.

use std::time::Duration;

use parley_common::Timestamp;

use crate::config::{Config, JoinPolicy};
use crate::error::{ChatError, ChatResult};
use crate::gateway::registry::ConnectionRegistry;

use super::directory::RoomSummary;
use super::room::JoinRequest;
use super::store::{Admission, Creation, Departure, Disconnect, JoinOutcome, Rejection, RoomStore, Withdrawn};

/// Result of `requestJoinRoom` / `joinRoom`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReply {
    pub outcome: JoinOutcome,
    /// The lobby did not exist and was created by this call.
    pub lobby_created: bool,
}

/// Result of `checkAccess`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Granted(Admission),
    Denied { room: String, user: String },
}

/// A chat message accepted for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub room: String,
    pub user: String,
    pub connection_id: String,
    pub message: String,
    pub timestamp: Timestamp,
    /// Every member of the sender's room, sender included.
    pub recipients: Vec<String>,
}

pub struct Membership {
    store: RoomStore,
    registry: ConnectionRegistry,
    policy: JoinPolicy,
}

impl Membership {
    pub fn new(config: &Config, registry: ConnectionRegistry) -> Self {
        Self {
            store: RoomStore::new(&config.lobby_room, registry.clone()),
            registry,
            policy: config.join_policy,
        }
    }

    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    pub fn policy(&self) -> JoinPolicy {
        self.policy
    }

    pub fn ensure_lobby(&self) -> bool {
        self.store.ensure_lobby()
    }

    /// Track a freshly upgraded connection.
    pub fn connect(&self, connection_id: &str) {
        self.registry.register(connection_id);
    }

    pub fn create_room(&self, connection_id: &str, room: &str, owner: &str) -> ChatResult<Creation> {
        self.registry.set_name(connection_id, owner);
        self.store.create_room(room, owner, connection_id)
    }

    /// `requestJoinRoom`. A name that already holds membership under another
    /// connection is re-admitted on this one instead of queueing a request.
    pub fn request_join(&self, connection_id: &str, room: &str, user: &str) -> ChatResult<JoinReply> {
        self.registry.set_name(connection_id, user);
        self.store.transaction(|rooms| -> ChatResult<JoinReply> {
            let lobby_created = room == rooms.lobby() && rooms.ensure_lobby();

            let existing = rooms
                .get(room)
                .and_then(|r| r.connection_of(user))
                .map(str::to_string);

            let outcome = match existing {
                Some(existing) if existing != connection_id => {
                    JoinOutcome::Admitted(rooms.rebind_member(room, user, connection_id)?)
                }
                _ => rooms.request_join(room, user, connection_id)?,
            };

            Ok(JoinReply {
                outcome,
                lobby_created,
            })
        })
    }

    pub fn accept_join(
        &self,
        connection_id: &str,
        room: &str,
        requestor: &str,
        requestor_connection: Option<&str>,
    ) -> ChatResult<Admission> {
        self.store
            .accept_join(room, requestor, requestor_connection, connection_id, self.policy)
    }

    pub fn reject_join(&self, connection_id: &str, room: &str, requestor: &str) -> ChatResult<Rejection> {
        self.store
            .reject_join(room, requestor, connection_id, self.policy)
    }

    /// `joinRoom`: confirm or repair membership after the client navigated to
    /// the chat view. Members are (re)bound to this connection, an empty room
    /// admits the caller, anyone else has to go through a join request.
    pub fn join_room(&self, connection_id: &str, room: &str, user: &str) -> ChatResult<JoinReply> {
        self.registry.set_name(connection_id, user);
        self.store.transaction(|rooms| -> ChatResult<JoinReply> {
            let lobby_created = room == rooms.lobby() && rooms.ensure_lobby();

            let target = rooms
                .get(room)
                .ok_or_else(|| ChatError::RoomNotFound(room.to_string()))?;

            let outcome = if target.has_member_named(user) {
                JoinOutcome::Admitted(rooms.rebind_member(room, user, connection_id)?)
            } else if target.is_empty() {
                rooms.request_join(room, user, connection_id)?
            } else {
                return Err(ChatError::unauthorized(format!(
                    "{user} has not been admitted to \"{room}\"; send a join request first"
                )));
            };

            Ok(JoinReply {
                outcome,
                lobby_created,
            })
        })
    }

    /// `checkAccess`: whether `user` already holds membership. A hit rebinds
    /// the membership to this connection.
    pub fn check_access(&self, connection_id: &str, room: &str, user: &str) -> Access {
        self.registry.set_name(connection_id, user);
        self.store.transaction(|rooms| {
            if !rooms.is_member(room, user) {
                return Access::Denied {
                    room: room.to_string(),
                    user: user.to_string(),
                };
            }
            match rooms.rebind_member(room, user, connection_id) {
                Ok(admission) => Access::Granted(admission),
                Err(_) => Access::Denied {
                    room: room.to_string(),
                    user: user.to_string(),
                },
            }
        })
    }

    /// `leaveRoom`: explicit departure from the caller's current room.
    pub fn leave(&self, connection_id: &str) -> Option<Departure> {
        self.store.transaction(|rooms| rooms.leave_current(connection_id))
    }

    /// Transport disconnect cascade.
    pub fn disconnect(&self, connection_id: &str) -> Disconnect {
        self.store.transaction(|rooms| rooms.disconnect(connection_id))
    }

    /// Accept a chat message from `connection_id`. Returns `None` (and the
    /// message is dropped) when the sender is not a member of any room or the
    /// message is blank.
    pub fn send_message(&self, connection_id: &str, message: &str) -> Option<ChatMessage> {
        if message.trim().is_empty() {
            return None;
        }
        self.store.transaction(|rooms| -> Option<ChatMessage> {
            let (room, user) = rooms.membership_of(connection_id)?;
            Some(ChatMessage {
                room: room.name.clone(),
                user,
                connection_id: connection_id.to_string(),
                message: message.to_string(),
                timestamp: Timestamp::now(),
                recipients: room.connection_ids(),
            })
        })
    }

    pub fn join_requests(&self, room: &str) -> Vec<JoinRequest> {
        self.store.transaction(|rooms| rooms.pending_requests(room))
    }

    /// Members of `room` other than the caller.
    pub fn room_users(&self, connection_id: &str, room: &str) -> Vec<String> {
        let own_name = self.registry.name_of(connection_id);
        self.store.transaction(|rooms| {
            let Some(target) = rooms.get(room) else {
                return Vec::new();
            };
            let me = target
                .name_of(connection_id)
                .map(str::to_string)
                .or(own_name);
            target
                .member_names()
                .into_iter()
                .filter(|name| Some(name) != me.as_ref())
                .collect()
        })
    }

    pub fn active_rooms(&self) -> Vec<RoomSummary> {
        self.store.list_active()
    }

    /// Drop pending requests older than `ttl`.
    pub fn expire_requests(&self, ttl: Duration) -> Vec<Withdrawn> {
        let now = Timestamp::now();
        self.store
            .transaction(|rooms| rooms.expire_requests(ttl, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::store::AdmissionKind;

    fn membership(policy: JoinPolicy) -> Membership {
        let config = Config {
            lobby_room: "Lobby".to_string(),
            join_policy: policy,
            ..Config::default()
        };
        let m = Membership::new(&config, ConnectionRegistry::new());
        for conn in ["c-amy", "c-bob", "c-bob-2", "c-cat", "c-dan"] {
            m.connect(conn);
        }
        m
    }

    fn alpha(m: &Membership) {
        m.create_room("c-amy", "Alpha", "Amy").unwrap();
        m.request_join("c-bob", "Alpha", "Bob").unwrap();
        m.accept_join("c-amy", "Alpha", "Bob", Some("c-bob")).unwrap();
    }

    #[test]
    fn message_from_non_member_is_dropped() {
        let m = membership(JoinPolicy::AnyMember);
        assert!(m.send_message("c-dan", "hello?").is_none());
    }

    #[test]
    fn blank_message_is_dropped() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);
        assert!(m.send_message("c-amy", "   ").is_none());
    }

    #[test]
    fn message_reaches_exactly_the_senders_room() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);
        m.create_room("c-cat", "Beta", "Cat").unwrap();

        let msg = m.send_message("c-bob", "hi all").unwrap();
        assert_eq!(msg.room, "Alpha");
        assert_eq!(msg.user, "Bob");
        assert_eq!(msg.recipients, vec!["c-amy", "c-bob"]);
        assert!(!msg.recipients.contains(&"c-cat".to_string()));
    }

    #[test]
    fn pending_requester_cannot_send_messages() {
        let m = membership(JoinPolicy::AnyMember);
        m.create_room("c-amy", "Alpha", "Amy").unwrap();
        m.request_join("c-bob", "Alpha", "Bob").unwrap();
        assert!(m.send_message("c-bob", "let me in").is_none());
    }

    #[test]
    fn reconnecting_member_is_readmitted_without_a_request() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);

        let reply = m.request_join("c-bob-2", "Alpha", "Bob").unwrap();
        match reply.outcome {
            JoinOutcome::Admitted(admission) => {
                assert_eq!(admission.kind, AdmissionKind::Rebound);
                assert_eq!(admission.evicted.as_deref(), Some("c-bob"));
            }
            other => panic!("expected re-admission, got {other:?}"),
        }
        assert!(m.join_requests("Alpha").is_empty());
        assert!(m.send_message("c-bob", "old tab").is_none());
        assert!(m.send_message("c-bob-2", "new tab").is_some());
    }

    #[test]
    fn same_connection_requesting_again_is_already_member() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);
        let err = m.request_join("c-bob", "Alpha", "Bob").unwrap_err();
        assert!(matches!(err, ChatError::AlreadyMember { .. }));
    }

    #[test]
    fn carol_scenario_lobby_auto_created() {
        let m = membership(JoinPolicy::AnyMember);
        let reply = m.request_join("c-cat", "Lobby", "Carol").unwrap();
        assert!(reply.lobby_created);
        match reply.outcome {
            JoinOutcome::Admitted(admission) => {
                assert_eq!(admission.kind, AdmissionKind::Auto);
                assert_eq!(admission.owner.as_deref(), Some("Carol"));
            }
            other => panic!("expected admission, got {other:?}"),
        }
        assert!(m.join_requests("Lobby").is_empty());
    }

    #[test]
    fn ensure_lobby_before_first_request_means_no_lazy_creation() {
        let m = membership(JoinPolicy::AnyMember);
        assert!(m.ensure_lobby());
        let reply = m.request_join("c-cat", "Lobby", "Carol").unwrap();
        assert!(!reply.lobby_created);
    }

    #[test]
    fn join_room_confirms_existing_member() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);
        let reply = m.join_room("c-bob", "Alpha", "Bob").unwrap();
        match reply.outcome {
            JoinOutcome::Admitted(admission) => assert_eq!(admission.kind, AdmissionKind::Confirmed),
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    #[test]
    fn join_room_repairs_membership_after_navigation() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);
        let reply = m.join_room("c-bob-2", "Alpha", "Bob").unwrap();
        match reply.outcome {
            JoinOutcome::Admitted(admission) => {
                assert_eq!(admission.kind, AdmissionKind::Rebound);
                assert_eq!(admission.members, vec!["Amy", "Bob"]);
            }
            other => panic!("expected re-admission, got {other:?}"),
        }
    }

    #[test]
    fn join_room_without_admission_is_unauthorized() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);
        let err = m.join_room("c-dan", "Alpha", "Dan").unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));
        let err = m.join_room("c-dan", "Nowhere", "Dan").unwrap_err();
        assert_eq!(err, ChatError::RoomNotFound("Nowhere".into()));
    }

    #[test]
    fn join_room_on_empty_lobby_auto_admits() {
        let m = membership(JoinPolicy::AnyMember);
        let reply = m.join_room("c-dan", "Lobby", "Dan").unwrap();
        assert!(matches!(reply.outcome, JoinOutcome::Admitted(_)));
    }

    #[test]
    fn check_access_rebinds_members_and_denies_others() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);
        assert!(matches!(m.check_access("c-bob-2", "Alpha", "Bob"), Access::Granted(_)));
        assert!(matches!(m.check_access("c-dan", "Alpha", "Dan"), Access::Denied { .. }));
        assert!(matches!(m.check_access("c-dan", "Nowhere", "Dan"), Access::Denied { .. }));
    }

    #[test]
    fn room_users_excludes_the_caller() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);
        assert_eq!(m.room_users("c-amy", "Alpha"), vec!["Bob"]);
        assert_eq!(m.room_users("c-dan", "Alpha"), vec!["Amy", "Bob"]);
        assert!(m.room_users("c-dan", "Nowhere").is_empty());
    }

    #[test]
    fn leave_transfers_ownership_and_clears_association() {
        let m = membership(JoinPolicy::AnyMember);
        alpha(&m);
        let departure = m.leave("c-amy").unwrap();
        assert_eq!(departure.new_owner.as_deref(), Some("Bob"));
        assert!(m.leave("c-amy").is_none());
        assert!(m.send_message("c-amy", "still here?").is_none());
    }

    #[test]
    fn owner_only_policy_comes_from_config() {
        let m = membership(JoinPolicy::OwnerOnly);
        alpha(&m);
        m.request_join("c-cat", "Alpha", "Cat").unwrap();
        let err = m.accept_join("c-bob", "Alpha", "Cat", None).unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));
        assert_eq!(m.policy(), JoinPolicy::OwnerOnly);
    }

    #[test]
    fn disconnect_of_pending_requester_resolves_request() {
        let m = membership(JoinPolicy::AnyMember);
        m.create_room("c-amy", "Alpha", "Amy").unwrap();
        m.request_join("c-bob", "Alpha", "Bob").unwrap();
        let gone = m.disconnect("c-bob");
        assert_eq!(gone.withdrawn.len(), 1);
        assert!(m.join_requests("Alpha").is_empty());
    }

    #[test]
    fn expire_requests_with_zero_ttl_drops_everything() {
        let m = membership(JoinPolicy::AnyMember);
        m.create_room("c-amy", "Alpha", "Amy").unwrap();
        m.request_join("c-bob", "Alpha", "Bob").unwrap();
        let expired = m.expire_requests(Duration::ZERO);
        assert_eq!(expired.len(), 1);
        assert!(m.join_requests("Alpha").is_empty());
    }
}
