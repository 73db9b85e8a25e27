//! A single room: owner, admitted members, and the pending join-request queue.

use indexmap::IndexMap;
use parley_common::Timestamp;
use serde::Serialize;

/// One display name's pending ask to enter a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinRequest {
    pub user: String,
    /// Connection that should be admitted if the request is accepted. Always
    /// the most recent connection that asked under `user`.
    #[serde(rename = "socketId")]
    pub connection_id: String,
    #[serde(rename = "timestamp")]
    pub requested_at: Timestamp,
}

/// Result of queueing a join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedRequest {
    /// First request from this name.
    New(JoinRequest),
    /// The name already had a request pending; only its connection id was
    /// refreshed.
    Duplicate(JoinRequest),
}

#[derive(Debug, Clone)]
pub struct Room {
    pub name: String,
    /// `None` only while the lobby sits empty.
    pub owner: Option<String>,
    /// Connection id → display name, in admission order.
    members: IndexMap<String, String>,
    requests: Vec<JoinRequest>,
    pub created_at: Timestamp,
}

impl Room {
    /// A room created by `owner` on connection `connection_id`.
    pub fn new(name: &str, owner: &str, connection_id: &str, now: Timestamp) -> Self {
        let mut members = IndexMap::new();
        members.insert(connection_id.to_string(), owner.to_string());
        Self {
            name: name.to_string(),
            owner: Some(owner.to_string()),
            members,
            requests: Vec::new(),
            created_at: now,
        }
    }

    /// An empty, ownerless room (the lobby before anyone shows up).
    pub fn empty(name: &str, now: Timestamp) -> Self {
        Self {
            name: name.to_string(),
            owner: None,
            members: IndexMap::new(),
            requests: Vec::new(),
            created_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Member names in admission order.
    pub fn member_names(&self) -> Vec<String> {
        self.members.values().cloned().collect()
    }

    /// Member connection ids in admission order.
    pub fn connection_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn name_of(&self, connection_id: &str) -> Option<&str> {
        self.members.get(connection_id).map(String::as_str)
    }

    pub fn has_connection(&self, connection_id: &str) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Connection currently registered under `user`, if `user` is a member.
    pub fn connection_of(&self, user: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, name)| name.as_str() == user)
            .map(|(conn, _)| conn.as_str())
    }

    pub fn has_member_named(&self, user: &str) -> bool {
        self.connection_of(user).is_some()
    }

    pub fn is_owner(&self, user: &str) -> bool {
        self.owner.as_deref() == Some(user)
    }

    /// Admit `connection_id` under `user`.
    ///
    /// Names are unique among members: if `user` is already registered under
    /// a different connection, that stale entry is evicted first and its
    /// connection id returned. The replacement keeps the evicted entry's
    /// position so ownership order is unaffected.
    pub fn insert_member(&mut self, connection_id: &str, user: &str) -> Option<String> {
        let stale = self
            .connection_of(user)
            .filter(|conn| *conn != connection_id)
            .map(str::to_string);

        let stale_index = stale
            .as_deref()
            .and_then(|conn| self.members.get_index_of(conn));
        match stale_index {
            Some(index) => {
                self.members.shift_remove_index(index);
                self.members.shift_remove(connection_id);
                let index = index.min(self.members.len());
                self.members
                    .shift_insert(index, connection_id.to_string(), user.to_string());
            }
            None => {
                self.members
                    .insert(connection_id.to_string(), user.to_string());
            }
        }

        if self.owner.is_none() {
            self.owner = Some(user.to_string());
        }
        stale
    }

    /// Remove a member by connection. Returns the name it was admitted under.
    /// Ownership is not touched; see [`Room::reassign_owner`].
    pub fn remove_member(&mut self, connection_id: &str) -> Option<String> {
        self.members.shift_remove(connection_id)
    }

    /// Hand ownership to the earliest-admitted remaining member. Clears the
    /// owner when nobody is left. Returns the new owner.
    pub fn reassign_owner(&mut self) -> Option<String> {
        self.owner = self.members.values().next().cloned();
        self.owner.clone()
    }

    pub fn requests(&self) -> &[JoinRequest] {
        &self.requests
    }

    pub fn request_from(&self, user: &str) -> Option<&JoinRequest> {
        self.requests.iter().find(|r| r.user == user)
    }

    /// Queue a request, deduplicated by name.
    pub fn queue_request(&mut self, user: &str, connection_id: &str, now: Timestamp) -> QueuedRequest {
        if let Some(existing) = self.requests.iter_mut().find(|r| r.user == user) {
            existing.connection_id = connection_id.to_string();
            return QueuedRequest::Duplicate(existing.clone());
        }

        let request = JoinRequest {
            user: user.to_string(),
            connection_id: connection_id.to_string(),
            requested_at: now,
        };
        self.requests.push(request.clone());
        QueuedRequest::New(request)
    }

    /// Remove and return the pending request from `user`.
    pub fn take_request(&mut self, user: &str) -> Option<JoinRequest> {
        let index = self.requests.iter().position(|r| r.user == user)?;
        Some(self.requests.remove(index))
    }

    /// Remove every request that would admit `connection_id`.
    pub fn drop_requests_from(&mut self, connection_id: &str) -> Vec<JoinRequest> {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.requests)
            .into_iter()
            .partition(|r| r.connection_id == connection_id);
        self.requests = kept;
        dropped
    }

    /// Remove every request for which `expired` returns true.
    pub fn drop_requests_where(&mut self, expired: impl Fn(&JoinRequest) -> bool) -> Vec<JoinRequest> {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.requests)
            .into_iter()
            .partition(|r| expired(r));
        self.requests = kept;
        dropped
    }
}
