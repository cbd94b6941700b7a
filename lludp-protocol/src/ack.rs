//! Pending inbound acknowledgements
//!
//! Sequence numbers of reliable packets we received and still owe the
//! sender an ack for. They leave either piggybacked on an outgoing reliable
//! packet or in a standalone PacketAck.

use std::collections::BTreeSet;

/// Ordered set of sequence numbers awaiting acknowledgement
#[derive(Debug, Clone, Default)]
pub struct PendingAcks {
    acks: BTreeSet<u32>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a sequence number, returning the number now pending
    pub fn queue(&mut self, seq: u32) -> usize {
        self.acks.insert(seq);
        self.acks.len()
    }

    /// Put back acks taken off a packet that failed delivery
    pub fn requeue<I: IntoIterator<Item = u32>>(&mut self, acks: I) {
        self.acks.extend(acks);
    }

    /// Remove and return everything pending, in ascending order
    pub fn take_all(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.acks).into_iter().collect()
    }

    /// Take everything if at least one and at most `max` acks are pending
    ///
    /// Used for piggybacking: a larger backlog is left for a standalone
    /// flush so the header stays small.
    pub fn take_if_at_most(&mut self, max: usize) -> Option<Vec<u32>> {
        if self.acks.is_empty() || self.acks.len() > max {
            return None;
        }
        Some(self.take_all())
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.acks.contains(&seq)
    }

    pub fn len(&self) -> usize {
        self.acks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acks.is_empty()
    }
}
