//! Duplicate detection window
//!
//! Remembers the most recent inbound sequence numbers of a connection so a
//! packet delivered twice is dispatched once.

use std::collections::{HashSet, VecDeque};

/// Number of entries evicted at once when the window is full
pub const EVICT_BATCH: usize = 4;

/// Bounded FIFO of recently received sequence numbers
#[derive(Debug, Clone)]
pub struct PacketArchive {
    order: VecDeque<u32>,
    seen: HashSet<u32>,
    capacity: usize,
}

impl PacketArchive {
    /// Create an archive holding at most `capacity` sequence numbers
    ///
    /// # Panics
    /// Panics if `capacity` is zero
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Archive capacity must be non-zero");
        PacketArchive {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Check if a sequence number is in the window
    #[inline]
    pub fn contains(&self, seq: u32) -> bool {
        self.seen.contains(&seq)
    }

    /// Record a sequence number
    ///
    /// Returns false if it was already present. When the window is full the
    /// oldest entries are evicted in batches of [`EVICT_BATCH`].
    pub fn insert(&mut self, seq: u32) -> bool {
        if self.seen.contains(&seq) {
            return false;
        }

        while self.order.len() >= self.capacity {
            for _ in 0..EVICT_BATCH {
                match self.order.pop_front() {
                    Some(old) => {
                        self.seen.remove(&old);
                    }
                    None => break,
                }
            }
        }

        self.order.push_back(seq);
        self.seen.insert(seq);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
