//! Connection ID generation for log correlation.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Counter backing short connection IDs.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier attached to every proxied session's log lines.
#[derive(Clone, Debug)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// A globally unique ID, suitable when logs are aggregated across
    /// processes.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// A short ID, unique within this process. Format: `conn-{hex counter}`.
    pub fn short() -> Self {
        let count = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn-{count:012x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
