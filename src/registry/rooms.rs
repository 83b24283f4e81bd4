//! Room registry
//!
//! Room membership is per user, not per connection, and a user is in at most
//! one room at a time: joining a room implicitly leaves the previous one.
//! A room exists only while it has members.

use crate::core::ids::{RoomId, UserId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// What a [`RoomRegistry::join`] changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room the user was moved out of
    pub left: Option<RoomId>,
    /// The user was already a member; nothing changed
    pub already_member: bool,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, HashSet<UserId>>,
    current: HashMap<UserId, RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a room, leaving their previous room first
    pub fn join(&mut self, user_id: &UserId, room_id: &RoomId) -> JoinOutcome {
        if self.current.get(user_id) == Some(room_id) {
            return JoinOutcome {
                left: None,
                already_member: true,
            };
        }

        let left = match self.current.get(user_id).cloned() {
            Some(previous) => {
                self.remove_member(user_id, &previous);
                Some(previous)
            }
            None => None,
        };

        self.rooms
            .entry(room_id.clone())
            .or_default()
            .insert(user_id.clone());
        self.current.insert(user_id.clone(), room_id.clone());

        JoinOutcome {
            left,
            already_member: false,
        }
    }

    /// Remove a user from a room
    ///
    /// Returns `false` when the user was not a member. The room is deleted
    /// when its last member leaves.
    pub fn leave(&mut self, user_id: &UserId, room_id: &RoomId) -> bool {
        if self.current.get(user_id) != Some(room_id) {
            return false;
        }
        self.current.remove(user_id);
        self.remove_member(user_id, room_id);
        true
    }

    fn remove_member(&mut self, user_id: &UserId, room_id: &RoomId) {
        let emptied = match self.rooms.get_mut(room_id) {
            Some(members) => {
                members.remove(user_id);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.rooms.remove(room_id);
        }
    }

    /// Members of a room (empty when the room does not exist)
    pub fn members_of(&self, room_id: &RoomId) -> HashSet<UserId> {
        self.rooms.get(room_id).cloned().unwrap_or_default()
    }

    /// The room a user is currently in
    pub fn room_of(&self, user_id: &UserId) -> Option<&RoomId> {
        self.current.get(user_id)
    }

    /// Member count per room
    pub fn room_sizes(&self) -> BTreeMap<RoomId, usize> {
        let mut sizes = BTreeMap::new();
        for (room_id, members) in &self.rooms {
            if members.is_empty() {
                tracing::error!(room_id = %room_id, "Invariant violated: empty room still registered");
                continue;
            }
            sizes.insert(room_id.clone(), members.len());
        }
        sizes
    }

    /// Number of rooms with at least one member
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Remove every room (process shutdown)
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.current.clear();
    }
}
