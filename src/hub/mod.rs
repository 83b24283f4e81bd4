//! Connection hub: the shared state behind every WebSocket connection
//!
//! The `Hub` owns the connection, room and mailbox registries behind one
//! `RwLock` and is the only way to reach them. Every operation follows the
//! same discipline:
//!
//! ```text
//! lock ──▶ mutate registries ──▶ resolve audience (connection senders) ──▶ unlock
//!                                                                            │
//!            prune failed ◀── concurrent send_timeout on each sender ◀───────┘
//! ```
//!
//! Audience members without a live connection get the message in their
//! offline mailbox instead. A send that fails or times out removes that
//! connection through the normal disconnect path, which may in turn notify
//! the rest of its room.
//!
//! Sending and pruning run on a spawned task that the caller awaits. A caller
//! that is cancelled midway (its own connection closing) leaves the delivery
//! to finish on its own.

mod reaper;
mod stats;

pub use reaper::spawn_reaper;
pub use stats::HubStats;

use crate::config::HubConfig;
use crate::core::error::{DeliveryError, ProtocolError};
use crate::core::ids::{ConnectionId, RoomId, UserId};
use crate::core::protocol::{CLOSE_GOING_AWAY, ServerMessage};
use crate::registry::{Connection, ConnectionRegistry, OfflineMailbox, Outbound, RoomRegistry};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{RwLock, mpsc};

/// A resolved recipient: one connection's outbound queue
#[derive(Debug, Clone)]
struct Target {
    connection_id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
}

impl From<&Connection> for Target {
    fn from(connection: &Connection) -> Self {
        Self {
            connection_id: connection.id.clone(),
            sender: connection.sender().clone(),
        }
    }
}

/// One message and the connections it must reach
#[derive(Debug)]
struct Delivery {
    targets: Vec<Target>,
    message: ServerMessage,
}

/// Outcome of [`Hub::send_to_user`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDelivery {
    /// Number of live connections the message was handed to
    pub delivered: usize,
    /// The user was offline and the message went to their mailbox
    pub queued: bool,
}

/// All registries, guarded together
struct Registries {
    connections: ConnectionRegistry,
    rooms: RoomRegistry,
    mailbox: OfflineMailbox,
}

impl Registries {
    /// Resolve the members of `room_id` other than `exclude`
    ///
    /// Members with no live connection get the message in their mailbox.
    fn room_audience(
        &mut self,
        room_id: &RoomId,
        exclude: &UserId,
        message: ServerMessage,
        now: DateTime<Utc>,
    ) -> Delivery {
        let mut targets = Vec::new();
        for member in self.rooms.members_of(room_id) {
            if &member == exclude {
                continue;
            }
            let connections = self.connections.connections_for(&member);
            if connections.is_empty() {
                tracing::warn!(
                    room_id = %room_id,
                    user_id = %member,
                    "Room member has no live connection, queueing message"
                );
                self.mailbox.enqueue(&member, message.clone(), now);
                continue;
            }
            targets.extend(connections.into_iter().map(Target::from));
        }
        Delivery { targets, message }
    }

    /// Target a single connection
    fn reply(&self, connection_id: &ConnectionId, message: ServerMessage) -> Option<Delivery> {
        let target = Target::from(self.connections.get(connection_id)?);
        Some(Delivery {
            targets: vec![target],
            message,
        })
    }

    /// Remove a connection and, for a user's last one, leave their room
    ///
    /// Returns the `user_left` delivery for the remaining room members.
    fn remove_connection(
        &mut self,
        connection_id: &ConnectionId,
        now: DateTime<Utc>,
    ) -> Option<Delivery> {
        let removed = self.connections.disconnect(connection_id)?;
        let user_id = removed.connection.user_id.clone();

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            last_for_user = removed.last_for_user,
            "WebSocket client disconnected"
        );

        if !removed.last_for_user {
            return None;
        }

        let room_id = self.rooms.room_of(&user_id)?.clone();
        self.rooms.leave(&user_id, &room_id);
        let notice = ServerMessage::UserLeft {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            timestamp: now,
        };
        Some(self.room_audience(&room_id, &user_id, notice, now))
    }
}

/// Shared state of all live connections
///
/// Thread-safe via a single `RwLock`; only stats and lookups take the read
/// side, every registry mutation takes the write side.
pub struct Hub {
    config: HubConfig,
    state: Arc<RwLock<Registries>>,
}

impl Hub {
    /// Create an empty hub
    pub fn new(config: HubConfig) -> Self {
        let mailbox = OfflineMailbox::new(config.mailbox_capacity, config.max_offline_queues);
        Self {
            config,
            state: Arc::new(RwLock::new(Registries {
                connections: ConnectionRegistry::new(),
                rooms: RoomRegistry::new(),
                mailbox,
            })),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new connection for an authenticated user
    ///
    /// Returns the connection id and the receiver the write loop drains. The
    /// receiver always starts with `connection_established`, followed by the
    /// user's offline messages when this is their first connection. When
    /// `room_id` is given the connection then joins that room.
    pub async fn connect(
        &self,
        user_id: UserId,
        room_id: Option<RoomId>,
    ) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.config.effective_outbound_buffer());
        let now = Utc::now();
        let mut connection = Connection::new(user_id.clone(), tx.clone(), now);
        let connection_id = connection.id.clone();

        let flushed = {
            let mut state = self.state.write().await;
            connection.room_id = state.rooms.room_of(&user_id).cloned();
            let announced_room = room_id.clone().or_else(|| connection.room_id.clone());
            let first = state.connections.connect(connection);

            let welcome = ServerMessage::ConnectionEstablished {
                user_id: user_id.clone(),
                connection_id: connection_id.clone(),
                room_id: announced_room,
                message: "Connected to real-time collaboration".to_string(),
            };
            if tx.try_send(Outbound::Message(welcome)).is_err() {
                tracing::debug!(connection_id = %connection_id, "Failed to queue welcome message");
            }

            if first {
                let queued = state.mailbox.flush(&user_id);
                let count = queued.len();
                for message in queued {
                    if tx.try_send(Outbound::Message(message.into_envelope())).is_err() {
                        tracing::debug!(
                            connection_id = %connection_id,
                            "Failed to queue offline message"
                        );
                    }
                }
                count
            } else {
                0
            }
        };
        drop(tx);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            offline_messages = flushed,
            "WebSocket client connected"
        );

        if let Some(room_id) = room_id {
            self.join_room(&connection_id, room_id).await;
        }

        (connection_id, rx)
    }

    /// Remove a connection (idempotent)
    ///
    /// If it was the user's last connection, the user leaves their room and
    /// the remaining members get `user_left`.
    pub async fn disconnect(&self, connection_id: &ConnectionId) {
        self.run_detached(Vec::new(), vec![connection_id.clone()])
            .await;
    }

    /// Record inbound activity on a connection
    pub async fn touch(&self, connection_id: &ConnectionId) {
        self.state
            .write()
            .await
            .connections
            .touch(connection_id, Utc::now());
    }

    /// Move the connection's user into `room_id`
    ///
    /// Other members get `user_joined`, members of the previous room get
    /// `user_left`, and the connection gets `room_joined` with the member
    /// list. Joining the current room again only repeats the confirmation.
    pub async fn join_room(&self, connection_id: &ConnectionId, room_id: RoomId) {
        let now = Utc::now();
        let deliveries = {
            let mut state = self.state.write().await;
            let Some(user_id) = state
                .connections
                .get(connection_id)
                .map(|c| c.user_id.clone())
            else {
                return;
            };

            let outcome = state.rooms.join(&user_id, &room_id);
            let mut deliveries = Vec::new();

            if !outcome.already_member {
                state
                    .connections
                    .set_room(&user_id, Some(room_id.clone()));

                if let Some(left) = outcome.left {
                    let notice = ServerMessage::UserLeft {
                        room_id: left.clone(),
                        user_id: user_id.clone(),
                        timestamp: now,
                    };
                    deliveries.push(state.room_audience(&left, &user_id, notice, now));
                }

                let notice = ServerMessage::UserJoined {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                    timestamp: now,
                };
                deliveries.push(state.room_audience(&room_id, &user_id, notice, now));

                tracing::info!(
                    connection_id = %connection_id,
                    user_id = %user_id,
                    room_id = %room_id,
                    "User joined room"
                );
            }

            let mut members: Vec<UserId> = state.rooms.members_of(&room_id).into_iter().collect();
            members.sort();
            deliveries.extend(state.reply(
                connection_id,
                ServerMessage::RoomJoined { room_id, members },
            ));
            deliveries
        };

        self.deliver(deliveries).await;
    }

    /// Take the connection's user out of a room
    ///
    /// Without an explicit `room_id` the user's current room is left.
    pub async fn leave_room(
        &self,
        connection_id: &ConnectionId,
        room_id: Option<RoomId>,
    ) -> Result<(), ProtocolError> {
        let now = Utc::now();
        let deliveries = {
            let mut state = self.state.write().await;
            let Some(user_id) = state
                .connections
                .get(connection_id)
                .map(|c| c.user_id.clone())
            else {
                return Ok(());
            };

            let room_id = match room_id.or_else(|| state.rooms.room_of(&user_id).cloned()) {
                Some(room_id) => room_id,
                None => return Err(ProtocolError::NotInRoom { requested: None }),
            };
            if !state.rooms.leave(&user_id, &room_id) {
                return Err(ProtocolError::NotInRoom {
                    requested: Some(room_id),
                });
            }
            state.connections.set_room(&user_id, None);

            tracing::info!(
                connection_id = %connection_id,
                user_id = %user_id,
                room_id = %room_id,
                "User left room"
            );

            let notice = ServerMessage::UserLeft {
                room_id: room_id.clone(),
                user_id: user_id.clone(),
                timestamp: now,
            };
            let mut deliveries = vec![state.room_audience(&room_id, &user_id, notice, now)];
            deliveries.extend(state.reply(connection_id, ServerMessage::RoomLeft { room_id }));
            deliveries
        };

        self.deliver(deliveries).await;
        Ok(())
    }

    /// Relay a message from a connection to the other members of its room
    ///
    /// `build` receives the sender's room, user id and the current time. When
    /// `requested` is set it must name the sender's current room. Returns the
    /// number of connections the message was handed to.
    pub async fn broadcast_from<F>(
        &self,
        connection_id: &ConnectionId,
        requested: Option<RoomId>,
        build: F,
    ) -> Result<usize, ProtocolError>
    where
        F: FnOnce(RoomId, UserId, DateTime<Utc>) -> ServerMessage,
    {
        let now = Utc::now();
        let delivery = {
            let mut state = self.state.write().await;
            let Some(user_id) = state
                .connections
                .get(connection_id)
                .map(|c| c.user_id.clone())
            else {
                return Ok(0);
            };

            let room_id = match (state.rooms.room_of(&user_id), requested) {
                (Some(current), Some(requested)) if *current != requested => {
                    return Err(ProtocolError::NotInRoom {
                        requested: Some(requested),
                    });
                }
                (Some(current), _) => current.clone(),
                (None, requested) => return Err(ProtocolError::NotInRoom { requested }),
            };

            let message = build(room_id.clone(), user_id.clone(), now);
            state.room_audience(&room_id, &user_id, message, now)
        };

        let count = delivery.targets.len();
        self.deliver(vec![delivery]).await;
        Ok(count)
    }

    /// Unicast to every live connection of a user, or queue it if offline
    pub async fn send_to_user(&self, user_id: &UserId, message: ServerMessage) -> UserDelivery {
        let now = Utc::now();
        let delivery = {
            let mut state = self.state.write().await;
            let targets: Vec<Target> = state
                .connections
                .connections_for(user_id)
                .into_iter()
                .map(Target::from)
                .collect();

            if targets.is_empty() {
                let outcome = state.mailbox.enqueue(user_id, message, now);
                if outcome.stored {
                    tracing::debug!(user_id = %user_id, "User offline, message queued");
                } else {
                    tracing::warn!(user_id = %user_id, "User offline and mailbox disabled, message dropped");
                }
                return UserDelivery {
                    delivered: 0,
                    queued: outcome.stored,
                };
            }
            Delivery { targets, message }
        };

        let delivered = delivery.targets.len();
        self.deliver(vec![delivery]).await;
        UserDelivery {
            delivered,
            queued: false,
        }
    }

    /// Send a message to one specific connection (replies, pong, errors)
    pub async fn send_to_connection(&self, connection_id: &ConnectionId, message: ServerMessage) {
        let delivery = self.state.read().await.reply(connection_id, message);
        if let Some(delivery) = delivery {
            self.deliver(vec![delivery]).await;
        }
    }

    /// Members of a room, sorted (empty if the room does not exist)
    pub async fn members_of(&self, room_id: &RoomId) -> Vec<UserId> {
        let mut members: Vec<UserId> = self
            .state
            .read()
            .await
            .rooms
            .members_of(room_id)
            .into_iter()
            .collect();
        members.sort();
        members
    }

    /// The room a user currently belongs to
    pub async fn room_of(&self, user_id: &UserId) -> Option<RoomId> {
        self.state.read().await.rooms.room_of(user_id).cloned()
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.state.read().await.connections.is_online(user_id)
    }

    /// Number of live connections of a user
    pub async fn connection_count_for(&self, user_id: &UserId) -> usize {
        self.state
            .read()
            .await
            .connections
            .connections_for(user_id)
            .len()
    }

    /// Number of messages waiting in a user's mailbox
    pub async fn pending_offline(&self, user_id: &UserId) -> usize {
        self.state.read().await.mailbox.pending(user_id)
    }

    /// Close every connection and drop all transient state
    ///
    /// Each connection is sent a close frame with [`CLOSE_GOING_AWAY`].
    /// Offline mailboxes are discarded.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        let connections = state.connections.drain();
        for connection in &connections {
            if !connection.try_close(CLOSE_GOING_AWAY, "server shutting down") {
                tracing::debug!(connection_id = %connection.id, "Could not queue close frame");
            }
        }
        state.rooms.clear();
        state.mailbox.clear();

        tracing::info!(closed = connections.len(), "Hub shut down");
    }

    /// Hand every delivery to its targets, then prune whoever failed
    async fn deliver(&self, deliveries: Vec<Delivery>) {
        self.run_detached(deliveries, Vec::new()).await;
    }

    /// Fan out and prune on a task of its own, then wait for it
    async fn run_detached(&self, deliveries: Vec<Delivery>, failed: Vec<ConnectionId>) {
        if failed.is_empty() && deliveries.iter().all(|d| d.targets.is_empty()) {
            return;
        }

        let state = Arc::clone(&self.state);
        let timeout = self.config.send_timeout();
        let task = tokio::spawn(async move {
            let mut failed = failed;
            failed.extend(fan_out(deliveries, timeout).await);
            prune(&state, failed, timeout).await;
        });

        if let Err(e) = task.await {
            tracing::error!(error = %e, "Delivery task failed");
        }
    }
}

/// Remove failed connections until no cascade notification fails
async fn prune(state: &RwLock<Registries>, mut failed: Vec<ConnectionId>, timeout: Duration) {
    while !failed.is_empty() {
        let now = Utc::now();
        let cascades: Vec<Delivery> = {
            let mut state = state.write().await;
            failed
                .iter()
                .filter_map(|id| state.remove_connection(id, now))
                .collect()
        };
        failed = fan_out(cascades, timeout).await;
    }
}

/// Send concurrently to all targets; returns the connections that failed
async fn fan_out(deliveries: Vec<Delivery>, timeout: Duration) -> Vec<ConnectionId> {
    let sends = deliveries.into_iter().flat_map(|delivery| {
        let message = delivery.message;
        delivery.targets.into_iter().map(move |target| {
            let outbound = Outbound::Message(message.clone());
            async move {
                let result = target
                    .sender
                    .send_timeout(outbound, timeout)
                    .await
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
                        SendTimeoutError::Closed(_) => DeliveryError::Closed,
                    });
                (target.connection_id, result)
            }
        })
    });

    join_all(sends)
        .await
        .into_iter()
        .filter_map(|(connection_id, result)| match result {
            Ok(()) => None,
            Err(error) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %error,
                    "Delivery failed, pruning connection"
                );
                Some(connection_id)
            }
        })
        .collect()
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
