//! Request identifier allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::RequestId;

/// Hands out request identifiers for one transport session.
///
/// Uniqueness guarantee: identifiers come from a per-session counter starting
/// at 1 and strictly increasing, so an id is never handed out twice while the
/// allocator lives. A `u64` cannot wrap within any realistic session, which
/// means no freshly allocated id can collide with a pending one. Each new
/// session gets a new allocator; ids are not unique across sessions.
#[derive(Debug)]
pub struct IdAllocator {
    last: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Allocate the next identifier. Never fails.
    pub fn next(&self) -> RequestId {
        RequestId::new(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
