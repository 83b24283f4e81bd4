//! Connection registry
//!
//! Owns every live connection and the presence index (user → connections).
//! A user is online iff their presence entry exists, and the entry is removed
//! the moment its last connection goes away.

use crate::core::ids::{ConnectionId, RoomId, UserId};
use crate::core::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// Item pushed onto a connection's outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialize and write this message
    Message(ServerMessage),
    /// Write a close frame and stop the write loop
    Close { code: u16, reason: String },
}

/// One live transport session
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub room_id: Option<RoomId>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    sender: mpsc::Sender<Outbound>,
}

impl Connection {
    /// Create a connection record with a fresh id
    pub fn new(user_id: UserId, sender: mpsc::Sender<Outbound>, now: DateTime<Utc>) -> Self {
        Self {
            id: ConnectionId::generate(),
            user_id,
            room_id: None,
            connected_at: now,
            last_activity: now,
            sender,
        }
    }

    /// Sender half of this connection's outbound queue
    pub fn sender(&self) -> &mpsc::Sender<Outbound> {
        &self.sender
    }

    /// Queue a close frame without waiting
    ///
    /// Returns `false` when the queue is full or the write loop already ended.
    pub fn try_close(&self, code: u16, reason: &str) -> bool {
        self.sender
            .try_send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }
}

/// A connection taken out of the registry
#[derive(Debug)]
pub struct Removed {
    pub connection: Connection,
    /// The user has no connection left and is now offline
    pub last_for_user: bool,
}

/// Registry of live connections indexed by id and by user
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    presence: HashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its user
    ///
    /// Returns `true` when this is the user's first live connection.
    pub fn connect(&mut self, connection: Connection) -> bool {
        let entry = self
            .presence
            .entry(connection.user_id.clone())
            .or_default();
        let first = entry.is_empty();
        entry.insert(connection.id.clone());
        self.connections.insert(connection.id.clone(), connection);
        first
    }

    /// Remove a connection
    ///
    /// Idempotent: removing an unknown or already removed id returns `None`.
    pub fn disconnect(&mut self, connection_id: &ConnectionId) -> Option<Removed> {
        let connection = self.connections.remove(connection_id)?;

        let mut last_for_user = true;
        if let Some(ids) = self.presence.get_mut(&connection.user_id) {
            ids.remove(connection_id);
            last_for_user = ids.is_empty();
        }
        if last_for_user {
            self.presence.remove(&connection.user_id);
        }

        Some(Removed {
            connection,
            last_for_user,
        })
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(connection_id)
    }

    /// All live connections of a user (empty when offline)
    pub fn connections_for(&self, user_id: &UserId) -> Vec<&Connection> {
        self.presence
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.connections.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.presence.contains_key(user_id)
    }

    /// Record inbound activity; returns `false` for unknown connections
    pub fn touch(&mut self, connection_id: &ConnectionId, now: DateTime<Utc>) -> bool {
        match self.connections.get_mut(connection_id) {
            Some(connection) => {
                connection.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Mirror a user's room change onto all of their connections
    pub fn set_room(&mut self, user_id: &UserId, room_id: Option<RoomId>) {
        let Some(ids) = self.presence.get(user_id) else {
            return;
        };
        for id in ids {
            if let Some(connection) = self.connections.get_mut(id) {
                connection.room_id = room_id.clone();
            }
        }
    }

    /// Connections whose last activity is strictly older than `cutoff`
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.last_activity < cutoff)
            .map(|c| c.id.clone())
            .collect()
    }

    /// Remove everything (process shutdown)
    pub fn drain(&mut self) -> Vec<Connection> {
        self.presence.clear();
        self.connections.drain().map(|(_, c)| c).collect()
    }

    /// Total number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of distinct online users
    pub fn user_count(&self) -> usize {
        self.presence.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conn(user: &str) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(UserId::from(user), tx, Utc::now()), rx)
    }

    #[test]
    fn test_first_connection_flag() {
        let mut registry = ConnectionRegistry::new();
        let (a1, _rx1) = conn("alice");
        let (a2, _rx2) = conn("alice");

        assert!(registry.connect(a1));
        assert!(!registry.connect(a2));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.user_count(), 1);
    }

    #[test]
    fn test_online_iff_connections_remain() {
        let mut registry = ConnectionRegistry::new();
        let alice = UserId::from("alice");
        let (a1, _rx1) = conn("alice");
        let (a2, _rx2) = conn("alice");
        let (id1, id2) = (a1.id.clone(), a2.id.clone());

        registry.connect(a1);
        registry.connect(a2);
        assert!(registry.is_online(&alice));

        let removed = registry.disconnect(&id1).unwrap();
        assert!(!removed.last_for_user);
        assert!(registry.is_online(&alice));
        assert_eq!(registry.connections_for(&alice).len(), 1);

        let removed = registry.disconnect(&id2).unwrap();
        assert!(removed.last_for_user);
        assert!(!registry.is_online(&alice));
        assert!(registry.connections_for(&alice).is_empty());
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (a1, _rx) = conn("alice");
        let id = a1.id.clone();
        registry.connect(a1);

        assert!(registry.disconnect(&id).is_some());
        assert!(registry.disconnect(&id).is_none());
        assert!(registry.disconnect(&ConnectionId::generate()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_touch_and_idle_since() {
        let mut registry = ConnectionRegistry::new();
        let (a1, _rx1) = conn("alice");
        let (b1, _rx2) = conn("bob");
        let (a_id, b_id) = (a1.id.clone(), b1.id.clone());
        registry.connect(a1);
        registry.connect(b1);

        let later = Utc::now() + Duration::minutes(10);
        assert!(registry.touch(&b_id, later));
        assert!(!registry.touch(&ConnectionId::generate(), later));

        let idle = registry.idle_since(later - Duration::minutes(5));
        assert_eq!(idle, vec![a_id]);
    }

    #[test]
    fn test_set_room_updates_every_device() {
        let mut registry = ConnectionRegistry::new();
        let alice = UserId::from("alice");
        let (a1, _rx1) = conn("alice");
        let (a2, _rx2) = conn("alice");
        registry.connect(a1);
        registry.connect(a2);

        registry.set_room(&alice, Some(RoomId::from("doc-1")));
        assert!(
            registry
                .connections_for(&alice)
                .iter()
                .all(|c| c.room_id.as_ref().map(RoomId::as_str) == Some("doc-1"))
        );

        registry.set_room(&alice, None);
        assert!(registry.connections_for(&alice).iter().all(|c| c.room_id.is_none()));
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        let (a1, _rx1) = conn("alice");
        let (b1, _rx2) = conn("bob");
        registry.connect(a1);
        registry.connect(b1);

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn test_try_close_queues_close_frame() {
        let (a1, mut rx) = conn("alice");
        assert!(a1.try_close(4008, "idle timeout"));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: 4008,
                reason: "idle timeout".to_string()
            }
        );
    }
}
