//! Call correlation ids.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id source, one per connection.
///
/// Ids start at 1 and are never reused while the generator lives. Both call
/// senders a responder creates across re-handshakes share one generator, so
/// a late reply to a replaced sender can never match a newer call.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator whose first id is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Take the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
