//! In-flight session counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts the sessions currently in flight against a single host.
///
/// All operations are lock-free and safe under any number of concurrent
/// callers. `get` returns a value that was accurate at some instant during
/// the call; callers that need a consistent snapshot across several counters
/// won't get one here, and the selector doesn't need one.
#[derive(Debug, Default)]
pub struct ConnectionCounter(AtomicU64);

impl ConnectionCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Add one in-flight session.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove one in-flight session.
    ///
    /// Callers must pair every `decrement` with a prior `increment`;
    /// decrementing past zero wraps.
    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current number of in-flight sessions.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
