//! Point-in-time counters of the hub

use super::Hub;
use crate::core::ids::RoomId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of the hub registries
///
/// Taken under one read lock, so the numbers are consistent with each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    /// Live connections across all users
    pub total_connections: usize,
    /// Users with at least one live connection
    pub active_users: usize,
    /// Rooms with at least one member
    pub rooms: usize,
    /// Users with undelivered offline messages
    pub offline_queues: usize,
    pub members_per_room: BTreeMap<RoomId, usize>,
}

impl Hub {
    pub async fn stats(&self) -> HubStats {
        let state = self.state.read().await;
        HubStats {
            total_connections: state.connections.len(),
            active_users: state.connections.user_count(),
            rooms: state.rooms.len(),
            offline_queues: state.mailbox.queue_count(),
            members_per_room: state.rooms.room_sizes(),
        }
    }
}
