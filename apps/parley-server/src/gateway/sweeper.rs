//! Background expiry of stale join requests.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::AppState;

use super::presence;

/// Sweep period for a given TTL: a quarter of it, between 1s and 60s.
pub fn sweep_period(ttl: Duration) -> Duration {
    (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Spawn a task that periodically expires join requests older than `ttl`
/// and tells the affected requesters and rooms.
pub fn spawn_request_sweeper(state: AppState, ttl: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(sweep_period(ttl));
        loop {
            interval.tick().await;
            state.broadcast.publish(|| {
                let expired = state.membership.expire_requests(ttl);
                if !expired.is_empty() {
                    tracing::info!(count = expired.len(), "expired pending join requests");
                }
                presence::expired(&expired)
            });
        }
    })
}
