//! Per-connection gateway session state.

use std::sync::atomic::{AtomicU64, Ordering};

use parley_common::id::prefix;
use parley_common::PrefixedId;

use super::fanout::Audience;

/// State for a single WebSocket connection.
pub struct GatewaySession {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    /// Monotonically increasing sequence number for dispatched events.
    seq: AtomicU64,
}

impl PrefixedId for GatewaySession {
    const PREFIX: &'static str = prefix::CONNECTION;
}

impl GatewaySession {
    /// A session with a freshly minted connection id.
    pub fn open() -> Self {
        Self::new(Self::generate())
    }

    pub fn new(connection_id: String) -> Self {
        Self {
            connection_id,
            seq: AtomicU64::new(0),
        }
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Check whether this session should receive a broadcast.
    pub fn is_addressed(&self, audience: &Audience) -> bool {
        audience.includes(&self.connection_id)
    }
}
