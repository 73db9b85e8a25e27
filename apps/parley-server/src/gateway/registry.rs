//! Connection registry: which live connections exist and which room each one
//! currently belongs to.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Per-connection bookkeeping.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub connection_id: String,
    /// Last display name this connection asserted, if any.
    pub name: Option<String>,
    /// Room the connection is a member of.
    pub room: Option<String>,
    pub connected_at: Instant,
}

/// Shared registry of all live connections.
///
/// Uses `DashMap` for shard-level concurrency and `parking_lot::Mutex` per
/// entry for non-poisoning, fast locking. Pure bookkeeping: no operation can
/// fail, and unknown connection ids are ignored.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, Mutex<ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection on transport-level connect.
    pub fn register(&self, connection_id: &str) {
        let entry = ConnectionEntry {
            connection_id: connection_id.to_string(),
            name: None,
            room: None,
            connected_at: Instant::now(),
        };
        self.connections
            .insert(connection_id.to_string(), Mutex::new(entry));
    }

    /// Drop a connection entirely. Returns the room it was in.
    pub fn deregister(&self, connection_id: &str) -> Option<String> {
        let (_, entry) = self.connections.remove(connection_id)?;
        entry.into_inner().room
    }

    /// Point a connection at a room, overwriting any prior association.
    pub fn associate(&self, connection_id: &str, room: &str) {
        if let Some(entry) = self.connections.get(connection_id) {
            entry.lock().room = Some(room.to_string());
        }
    }

    /// Clear a connection's room. Returns the previous room, if any.
    pub fn unassociate(&self, connection_id: &str) -> Option<String> {
        let entry = self.connections.get(connection_id)?;
        let mut e = entry.lock();
        e.room.take()
    }

    pub fn room_of(&self, connection_id: &str) -> Option<String> {
        let entry = self.connections.get(connection_id)?;
        let e = entry.lock();
        e.room.clone()
    }

    pub fn set_name(&self, connection_id: &str, name: &str) {
        if let Some(entry) = self.connections.get(connection_id) {
            entry.lock().name = Some(name.to_string());
        }
    }

    pub fn name_of(&self, connection_id: &str) -> Option<String> {
        let entry = self.connections.get(connection_id)?;
        let e = entry.lock();
        e.name.clone()
    }

    /// How long the connection has been open.
    pub fn uptime(&self, connection_id: &str) -> Option<std::time::Duration> {
        let entry = self.connections.get(connection_id)?;
        let e = entry.lock();
        Some(e.connected_at.elapsed())
    }

    /// Whether the connection is still attached to the transport.
    pub fn is_live(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_starts_unaffiliated() {
        let registry = ConnectionRegistry::new();
        registry.register("c1");
        assert!(registry.is_live("c1"));
        assert!(registry.room_of("c1").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn associate_overwrites_previous_room() {
        let registry = ConnectionRegistry::new();
        registry.register("c1");
        registry.associate("c1", "Alpha");
        registry.associate("c1", "Beta");
        assert_eq!(registry.room_of("c1").as_deref(), Some("Beta"));
    }

    #[test]
    fn unassociate_returns_prior_room_once() {
        let registry = ConnectionRegistry::new();
        registry.register("c1");
        registry.associate("c1", "Alpha");
        assert_eq!(registry.unassociate("c1").as_deref(), Some("Alpha"));
        assert!(registry.unassociate("c1").is_none());
        assert!(registry.is_live("c1"));
    }

    #[test]
    fn unknown_connections_are_ignored() {
        let registry = ConnectionRegistry::new();
        registry.associate("ghost", "Alpha");
        assert!(registry.room_of("ghost").is_none());
        assert!(registry.unassociate("ghost").is_none());
        assert!(registry.deregister("ghost").is_none());
        assert!(!registry.is_live("ghost"));
    }

    #[test]
    fn deregister_returns_room_and_forgets_connection() {
        let registry = ConnectionRegistry::new();
        registry.register("c1");
        registry.set_name("c1", "Amy");
        registry.associate("c1", "Alpha");
        assert_eq!(registry.name_of("c1").as_deref(), Some("Amy"));
        assert_eq!(registry.deregister("c1").as_deref(), Some("Alpha"));
        assert!(!registry.is_live("c1"));
        assert!(registry.is_empty());
    }
}
