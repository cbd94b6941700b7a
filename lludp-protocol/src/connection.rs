//! LLUDP Connection State
//!
//! Per-client state of one circuit: outbound sequencing, the table of
//! reliable packets awaiting acknowledgement, inbound acks we still owe, the
//! duplicate window, activity tracking and statistics.
//!
//! Lock layout: everything the send path touches lives in one
//! [`SendState`] behind a single mutex so that sequence assignment, ack
//! piggybacking and unacked tracking happen atomically per connection. The
//! duplicate window has its own lock because only the inbound worker uses it.

use crate::ack::PendingAcks;
use crate::agent::AgentId;
use crate::archive::PacketArchive;
use crate::packet::Packet;
use crate::sequence::{SequenceCounter, MAX_SEQUENCE};
use lludp_io::TickTimer;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not yet reachable through the address map
    Pending,
    /// Handshake complete, traffic flows
    Active,
    /// Torn down; terminal
    Removed,
}

/// Connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection is not in the correct state: {0:?}")]
    InvalidState(ConnectionState),

    #[error("Connection is closed")]
    Closed,
}

/// Traffic class of an outgoing packet
///
/// Only used for bookkeeping; every category gets the same delivery
/// treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacketCategory {
    #[default]
    Transaction,
    Overhead,
    Texture,
    Asset,
    State,
    Inventory,
    Messaging,
}

impl PacketCategory {
    pub const COUNT: usize = 7;

    pub const ALL: [PacketCategory; Self::COUNT] = [
        PacketCategory::Transaction,
        PacketCategory::Overhead,
        PacketCategory::Texture,
        PacketCategory::Asset,
        PacketCategory::State,
        PacketCategory::Inventory,
        PacketCategory::Messaging,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketCategory::Transaction => "transaction",
            PacketCategory::Overhead => "overhead",
            PacketCategory::Texture => "texture",
            PacketCategory::Asset => "asset",
            PacketCategory::State => "state",
            PacketCategory::Inventory => "inventory",
            PacketCategory::Messaging => "messaging",
        }
    }
}

impl fmt::Display for PacketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reliable packet awaiting acknowledgement
#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    pub packet: Packet,
    pub category: PacketCategory,
    /// Last time the packet went out; `None` while a resend is in flight
    pub sent_at: Option<Instant>,
    pub resend_count: u32,
}

impl OutgoingPacket {
    pub fn new(packet: Packet, category: PacketCategory, sent_at: Instant) -> Self {
        OutgoingPacket {
            packet,
            category,
            sent_at: Some(sent_at),
            resend_count: 0,
        }
    }

    /// Whether the packet has waited longer than `timeout` without an ack
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        match self.sent_at {
            Some(sent_at) => now.saturating_duration_since(sent_at) > timeout,
            None => false,
        }
    }
}

/// Send-side state, guarded by one lock per connection
#[derive(Debug)]
pub struct SendState {
    sequence: SequenceCounter,
    unacked: HashMap<u32, OutgoingPacket>,
    pending_acks: PendingAcks,
}

impl SendState {
    pub fn new(sequence_ceiling: u32) -> Self {
        SendState {
            sequence: SequenceCounter::with_ceiling(sequence_ceiling),
            unacked: HashMap::new(),
            pending_acks: PendingAcks::new(),
        }
    }

    /// Assign the next outbound sequence number
    #[inline]
    pub fn next_sequence(&mut self) -> u32 {
        self.sequence.next()
    }

    /// Sequence number the next first-time send will get
    pub fn peek_sequence(&self) -> u32 {
        self.sequence.peek()
    }

    /// Last sequence number handed out
    #[inline]
    pub fn current_sequence(&self) -> u32 {
        self.sequence.current()
    }

    /// Start tracking a reliable packet under its sequence number
    pub fn track(&mut self, seq: u32, packet: OutgoingPacket) {
        self.unacked.insert(seq, packet);
    }

    /// Remove an acknowledged packet
    ///
    /// Returns `None` if the sequence was not tracked (already acked,
    /// dropped, or never reliable).
    pub fn acknowledge(&mut self, seq: u32) -> Option<OutgoingPacket> {
        self.unacked.remove(&seq)
    }

    /// Sequences whose packets waited longer than `timeout`, ascending
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<u32> {
        let mut expired: Vec<u32> = self
            .unacked
            .iter()
            .filter(|(_, out)| out.is_expired(now, timeout))
            .map(|(seq, _)| *seq)
            .collect();
        expired.sort_unstable();
        expired
    }

    pub fn unacked(&self, seq: u32) -> Option<&OutgoingPacket> {
        self.unacked.get(&seq)
    }

    pub fn unacked_mut(&mut self, seq: u32) -> Option<&mut OutgoingPacket> {
        self.unacked.get_mut(&seq)
    }

    #[inline]
    pub fn is_unacked(&self, seq: u32) -> bool {
        self.unacked.contains_key(&seq)
    }

    #[inline]
    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    /// Lowest sequence still waiting for an ack
    pub fn oldest_unacked(&self) -> Option<u32> {
        self.unacked.keys().min().copied()
    }

    #[inline]
    pub fn pending_acks(&self) -> &PendingAcks {
        &self.pending_acks
    }

    #[inline]
    pub fn pending_acks_mut(&mut self) -> &mut PendingAcks {
        &mut self.pending_acks
    }
}

/// Construction parameters for a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub sequence_ceiling: u32,
    pub archive_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            sequence_ceiling: MAX_SEQUENCE,
            archive_capacity: 200,
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total packets sent, resends included
    pub packets_sent: u64,
    /// Total packets received, duplicates included
    pub packets_received: u64,
    /// Total retransmissions
    pub packets_resent: u64,
    /// Reliable packets given up on after exhausting their resends
    pub packets_dropped: u64,
    /// Inbound packets suppressed as duplicates
    pub duplicates: u64,
    /// Sequence numbers acknowledged through standalone PacketAcks
    pub acks_sent: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// First-time sends per [`PacketCategory`]
    pub sent_by_category: [u64; PacketCategory::COUNT],
}

impl ConnectionStats {
    pub fn sent_in(&self, category: PacketCategory) -> u64 {
        self.sent_by_category[category.index()]
    }
}

/// One client circuit
///
/// Shared as `Arc<Connection>` between the directory, the inbound worker,
/// senders and the connection's own timer thread.
pub struct Connection {
    agent_id: AgentId,
    remote_addr: SocketAddr,
    circuit_code: u32,
    state: RwLock<ConnectionState>,
    send: Mutex<SendState>,
    archive: Mutex<PacketArchive>,
    last_activity: Mutex<Instant>,
    stats: Mutex<ConnectionStats>,
    timer: Mutex<Option<TickTimer>>,
}

impl Connection {
    /// Create a new connection in the `Pending` state
    pub fn new(
        agent_id: AgentId,
        remote_addr: SocketAddr,
        circuit_code: u32,
        settings: ConnectionSettings,
        now: Instant,
    ) -> Self {
        Connection {
            agent_id,
            remote_addr,
            circuit_code,
            state: RwLock::new(ConnectionState::Pending),
            send: Mutex::new(SendState::new(settings.sequence_ceiling)),
            archive: Mutex::new(PacketArchive::new(settings.archive_capacity)),
            last_activity: Mutex::new(now),
            stats: Mutex::new(ConnectionStats::default()),
            timer: Mutex::new(None),
        }
    }

    #[inline]
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    #[inline]
    pub fn circuit_code(&self) -> u32 {
        self.circuit_code
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Move from `Pending` to `Active`
    pub fn activate(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.write();
        match *state {
            ConnectionState::Pending => {
                *state = ConnectionState::Active;
                Ok(())
            }
            ConnectionState::Removed => Err(ConnectionError::Closed),
            other => Err(ConnectionError::InvalidState(other)),
        }
    }

    /// Move to `Removed`
    ///
    /// Returns true only for the call that performed the transition.
    pub fn mark_removed(&self) -> bool {
        let mut state = self.state.write();
        if *state == ConnectionState::Removed {
            return false;
        }
        *state = ConnectionState::Removed;
        true
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn is_removed(&self) -> bool {
        self.state() == ConnectionState::Removed
    }

    /// Lock the send-side state
    pub fn lock_send(&self) -> MutexGuard<'_, SendState> {
        self.send.lock()
    }

    /// Lock the duplicate window
    pub fn archive(&self) -> MutexGuard<'_, PacketArchive> {
        self.archive.lock()
    }

    /// Record inbound activity
    pub fn touch(&self, now: Instant) {
        *self.last_activity.lock() = now;
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time since the last received packet
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    pub fn record_sent(&self, category: PacketCategory, bytes: usize, first_time: bool) {
        let mut stats = self.stats.lock();
        stats.packets_sent += 1;
        stats.bytes_sent += bytes as u64;
        if first_time {
            stats.sent_by_category[category.index()] += 1;
        } else {
            stats.packets_resent += 1;
        }
    }

    pub fn record_received(&self, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.packets_received += 1;
        stats.bytes_received += bytes as u64;
    }

    pub fn record_dropped(&self) {
        self.stats.lock().packets_dropped += 1;
    }

    pub fn record_duplicate(&self) {
        self.stats.lock().duplicates += 1;
    }

    pub fn record_acks_sent(&self, count: usize) {
        self.stats.lock().acks_sent += count as u64;
    }

    /// Hand the connection its periodic timer
    ///
    /// A timer attached after removal is cancelled immediately.
    pub fn attach_timer(&self, timer: TickTimer) {
        let mut slot = self.timer.lock();
        if self.is_removed() {
            drop(slot);
            tracing::debug!(agent = %self.agent_id, "Timer attached after removal, cancelling");
            timer.cancel();
            return;
        }
        *slot = Some(timer);
    }

    pub fn has_timer(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Stop the periodic timer
    ///
    /// When called from another thread this waits for a running tick to
    /// finish, so no tick starts or runs after it returns.
    pub fn cancel_timer(&self) {
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("agent_id", &self.agent_id)
            .field("remote_addr", &self.remote_addr)
            .field("circuit_code", &self.circuit_code)
            .field("state", &self.state())
            .finish()
    }
}
