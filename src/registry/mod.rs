//! In-memory registries owned by the [`Hub`](crate::hub::Hub)
//!
//! The three registries are plain data structures with no interior locking.
//! They are only reachable through the hub, which keeps them behind a single
//! lock so that a mutation and the audience computed from it always observe
//! the same state.

pub mod connections;
pub mod mailbox;
pub mod rooms;

pub use connections::{Connection, ConnectionRegistry, Outbound, Removed};
pub use mailbox::{Enqueued, OfflineMailbox, QueuedMessage};
pub use rooms::{JoinOutcome, RoomRegistry};
