//! Offline mailbox
//!
//! Bounded store-and-forward queue per user. When a queue is over capacity
//! the oldest entries are dropped, and the number of queues is capped as
//! well. A queue is handed out and deleted in one step when its user comes
//! back online.

use crate::core::ids::UserId;
use crate::core::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// A message waiting for its recipient
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub message: ServerMessage,
    pub stored_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Wrap for delivery to the reconnecting connection
    pub fn into_envelope(self) -> ServerMessage {
        ServerMessage::OfflineMessage {
            original_message: Box::new(self.message),
            stored_at: self.stored_at,
        }
    }
}

/// Result of [`OfflineMailbox::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// The message is now waiting in the user's queue
    pub stored: bool,
    /// Older messages of the same user dropped to make room
    pub evicted: usize,
}

#[derive(Debug)]
pub struct OfflineMailbox {
    capacity: usize,
    max_queues: usize,
    queues: HashMap<UserId, VecDeque<QueuedMessage>>,
}

impl OfflineMailbox {
    /// `capacity` bounds each queue, `max_queues` bounds the number of users
    /// with a queue
    pub fn new(capacity: usize, max_queues: usize) -> Self {
        Self {
            capacity,
            max_queues,
            queues: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message, evicting the oldest ones beyond capacity
    ///
    /// A user without a queue gets one only when fewer than `max_queues`
    /// exist; otherwise the queue written least recently is discarded first.
    pub fn enqueue(&mut self, user_id: &UserId, message: ServerMessage, now: DateTime<Utc>) -> Enqueued {
        if self.capacity == 0 || self.max_queues == 0 {
            return Enqueued {
                stored: false,
                evicted: 0,
            };
        }

        if !self.queues.contains_key(user_id) && self.queues.len() >= self.max_queues {
            self.evict_stalest_queue();
        }

        let queue = self.queues.entry(user_id.clone()).or_default();
        queue.push_back(QueuedMessage {
            message,
            stored_at: now,
        });

        let mut evicted = 0;
        while queue.len() > self.capacity {
            queue.pop_front();
            evicted += 1;
        }
        Enqueued {
            stored: true,
            evicted,
        }
    }

    /// Drop the queue whose newest message is the oldest
    fn evict_stalest_queue(&mut self) {
        let stalest = self
            .queues
            .iter()
            .min_by_key(|(_, queue)| queue.back().map(|q| q.stored_at))
            .map(|(user_id, _)| user_id.clone());

        if let Some(user_id) = stalest
            && let Some(dropped) = self.queues.remove(&user_id)
        {
            tracing::warn!(
                user_id = %user_id,
                dropped = dropped.len(),
                "Offline mailbox full, discarding stalest queue"
            );
        }
    }

    /// Take and delete the whole queue of a user, oldest first
    pub fn flush(&mut self, user_id: &UserId) -> Vec<QueuedMessage> {
        self.queues
            .remove(user_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Number of messages waiting for a user
    pub fn pending(&self, user_id: &UserId) -> usize {
        self.queues.get(user_id).map_or(0, VecDeque::len)
    }

    /// Number of users with a non-empty queue
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn note(n: usize) -> ServerMessage {
        ServerMessage::Notification {
            payload: json!({ "n": n }),
            timestamp: Utc::now(),
        }
    }

    fn payload_n(message: &ServerMessage) -> u64 {
        match message {
            ServerMessage::Notification { payload, .. } => payload["n"].as_u64().unwrap(),
            other => panic!("Expected Notification, got {:?}", other),
        }
    }

    #[test]
    fn test_enqueue_then_flush_preserves_order() {
        let mut mailbox = OfflineMailbox::new(50, 100);
        let dave = UserId::from("dave");

        mailbox.enqueue(&dave, note(1), Utc::now());
        mailbox.enqueue(&dave, note(2), Utc::now());

        let flushed = mailbox.flush(&dave);
        let order: Vec<u64> = flushed.iter().map(|q| payload_n(&q.message)).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(mailbox.pending(&dave), 0);
        assert_eq!(mailbox.queue_count(), 0);
    }

    #[test]
    fn test_overflow_keeps_most_recent_fifty() {
        let mut mailbox = OfflineMailbox::new(50, 100);
        let dave = UserId::from("dave");

        let evicted: usize = (0..60)
            .map(|n| mailbox.enqueue(&dave, note(n), Utc::now()).evicted)
            .sum();
        assert_eq!(evicted, 10);
        assert_eq!(mailbox.pending(&dave), 50);

        let order: Vec<u64> = mailbox
            .flush(&dave)
            .iter()
            .map(|q| payload_n(&q.message))
            .collect();
        assert_eq!(order, (10..60).collect::<Vec<u64>>());
    }

    #[test]
    fn test_flush_unknown_user_is_empty() {
        let mut mailbox = OfflineMailbox::new(50, 100);
        assert!(mailbox.flush(&UserId::from("nobody")).is_empty());
    }

    #[test]
    fn test_second_flush_is_empty() {
        let mut mailbox = OfflineMailbox::new(50, 100);
        let dave = UserId::from("dave");
        mailbox.enqueue(&dave, note(1), Utc::now());

        assert_eq!(mailbox.flush(&dave).len(), 1);
        assert!(mailbox.flush(&dave).is_empty());
    }

    #[test]
    fn test_queues_are_per_user() {
        let mut mailbox = OfflineMailbox::new(50, 100);
        mailbox.enqueue(&UserId::from("a"), note(1), Utc::now());
        mailbox.enqueue(&UserId::from("b"), note(2), Utc::now());

        assert_eq!(mailbox.queue_count(), 2);
        mailbox.flush(&UserId::from("a"));
        assert_eq!(mailbox.queue_count(), 1);
        assert_eq!(mailbox.pending(&UserId::from("b")), 1);
    }

    #[test]
    fn test_zero_capacity_never_creates_a_queue() {
        let mut mailbox = OfflineMailbox::new(0, 100);
        let dave = UserId::from("dave");
        assert_eq!(
            mailbox.enqueue(&dave, note(1), Utc::now()),
            Enqueued {
                stored: false,
                evicted: 0
            }
        );
        assert_eq!(mailbox.queue_count(), 0);
    }

    #[test]
    fn test_queue_count_is_bounded() {
        let mut mailbox = OfflineMailbox::new(50, 2);
        let t0 = Utc::now();

        mailbox.enqueue(&UserId::from("a"), note(1), t0);
        mailbox.enqueue(&UserId::from("b"), note(2), t0 + Duration::seconds(1));
        // `a` is written again, so `b` is now the stalest
        mailbox.enqueue(&UserId::from("a"), note(3), t0 + Duration::seconds(2));

        let outcome = mailbox.enqueue(&UserId::from("c"), note(4), t0 + Duration::seconds(3));
        assert!(outcome.stored);
        assert_eq!(mailbox.queue_count(), 2);
        assert_eq!(mailbox.pending(&UserId::from("a")), 2);
        assert_eq!(mailbox.pending(&UserId::from("b")), 0);
        assert_eq!(mailbox.pending(&UserId::from("c")), 1);
    }

    #[test]
    fn test_many_unknown_users_stay_within_cap() {
        let mut mailbox = OfflineMailbox::new(50, 100);
        for n in 0..10_000 {
            mailbox.enqueue(&UserId::new(format!("ghost-{}", n)), note(n), Utc::now());
        }
        assert_eq!(mailbox.queue_count(), 100);
    }

    #[test]
    fn test_into_envelope_wraps_message() {
        let stored_at = Utc::now();
        let queued = QueuedMessage {
            message: note(7),
            stored_at,
        };
        match queued.into_envelope() {
            ServerMessage::OfflineMessage {
                original_message,
                stored_at: at,
            } => {
                assert_eq!(payload_n(&original_message), 7);
                assert_eq!(at, stored_at);
            }
            other => panic!("Expected OfflineMessage, got {:?}", other),
        }
    }
}
