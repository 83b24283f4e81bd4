//! Periodic eviction of idle connections

use super::{Delivery, Hub};
use crate::core::protocol::CLOSE_IDLE_TIMEOUT;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

impl Hub {
    /// Close and remove every connection idle for longer than the timeout
    ///
    /// Each evicted connection is sent a close frame with
    /// [`CLOSE_IDLE_TIMEOUT`] and then goes through the regular disconnect
    /// path. Returns the number of evicted connections.
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        let idle_timeout = chrono::Duration::from_std(self.config.idle_timeout())
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(idle_timeout).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let (evicted, cascades) = {
            let mut state = self.state.write().await;
            let stale = state.connections.idle_since(cutoff);
            let mut cascades: Vec<Delivery> = Vec::new();

            for connection_id in &stale {
                if let Some(connection) = state.connections.get(connection_id) {
                    tracing::info!(
                        connection_id = %connection_id,
                        user_id = %connection.user_id,
                        last_activity = %connection.last_activity,
                        "Evicting idle connection"
                    );
                    connection.try_close(CLOSE_IDLE_TIMEOUT, "idle timeout");
                }
                cascades.extend(state.remove_connection(connection_id, now));
            }
            (stale.len(), cascades)
        };

        self.deliver(cascades).await;
        evicted
    }
}

/// Run [`Hub::sweep_idle`] on the configured interval until aborted
pub fn spawn_reaper(hub: Arc<Hub>) -> JoinHandle<()> {
    let period = hub.config().sweep_interval();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let evicted = hub.sweep_idle(Utc::now()).await;
            if evicted > 0 {
                tracing::info!(evicted, "Reaper sweep removed idle connections");
            } else {
                tracing::debug!("Reaper sweep found no idle connections");
            }
        }
    })
}
