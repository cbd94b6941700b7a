//! Outbound Transport
//!
//! Sequencing, reliable tracking, ack piggybacking and retransmission.
//!
//! Everything that touches a connection's send state for one packet
//! (sequence assignment, piggybacking, tracking, encoding) happens under
//! that connection's send lock. The lock is released before the datagram is
//! handed to the socket.

use crate::config::TransportConfig;
use crate::directory::ConnectionDirectory;
use bytes::BytesMut;
use lludp_io::{Clock, DatagramSink, TickTimer};
use lludp_protocol::{
    AgentId, Connection, MessageId, OutgoingPacket, Packet, PacketAck, PacketCategory,
    PacketError,
};
use std::io;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Errors returned to senders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Agent {0} is not connected")]
    NotConnected(AgentId),

    #[error("Failed to encode packet: {0}")]
    Encode(#[from] PacketError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Resend,
}

/// Send side of the transport
pub struct OutboundTransport {
    directory: Arc<ConnectionDirectory>,
    sink: Arc<dyn DatagramSink>,
    clock: Arc<dyn Clock>,
    config: TransportConfig,
}

impl OutboundTransport {
    pub fn new(
        directory: Arc<ConnectionDirectory>,
        sink: Arc<dyn DatagramSink>,
        clock: Arc<dyn Clock>,
        config: TransportConfig,
    ) -> Self {
        OutboundTransport {
            directory,
            sink,
            clock,
            config,
        }
    }

    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.directory
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send a packet to an agent
    ///
    /// Socket failures are logged, not returned; reliable packets are
    /// recovered by the resend scan.
    pub fn send(
        &self,
        agent: AgentId,
        packet: Packet,
        category: PacketCategory,
    ) -> Result<(), SendError> {
        let conn = match self.directory.lookup_by_identity(agent) {
            Some(conn) => conn,
            None => {
                warn!(agent = %agent, message = %packet.message_id, "Send to unknown agent");
                return Err(SendError::NotConnected(agent));
            }
        };
        self.send_to(&conn, packet, category)
    }

    /// Send a packet on a known connection
    pub fn send_to(
        &self,
        conn: &Connection,
        packet: Packet,
        category: PacketCategory,
    ) -> Result<(), SendError> {
        if !conn.is_active() {
            return Err(SendError::NotConnected(conn.agent_id()));
        }
        self.transmit(conn, packet, category, Attempt::First)
            .map_err(SendError::from)
    }

    /// Send a packet to every connection, each with its own sequence number
    ///
    /// Returns the number of connections the packet was sent to.
    pub fn broadcast(&self, packet: &Packet, category: PacketCategory) -> usize {
        let mut sent = 0;
        for conn in self.directory.connections() {
            match self.send_to(&conn, packet.clone(), category) {
                Ok(()) => sent += 1,
                Err(e) => debug!(agent = %conn.agent_id(), "Broadcast skipped connection: {}", e),
            }
        }
        sent
    }

    /// Acknowledge one sequence number with a standalone PacketAck
    pub fn send_ack(&self, agent: AgentId, seq: u32) -> Result<(), SendError> {
        let conn = self
            .directory
            .lookup_by_identity(agent)
            .ok_or(SendError::NotConnected(agent))?;
        self.send_ack_list(&conn, vec![seq])
    }

    /// Send every pending ack in one PacketAck
    pub fn flush_pending_acks(&self, conn: &Connection) {
        let acks = {
            let mut send = conn.lock_send();
            let pending = send.pending_acks_mut();
            if pending.is_empty() {
                return;
            }
            if pending.len() > self.config.max_pending_acks {
                error!(
                    agent = %conn.agent_id(),
                    pending = pending.len(),
                    max = self.config.max_pending_acks,
                    "Too many pending acks, skipping flush"
                );
                return;
            }
            pending.take_all()
        };

        if let Err(e) = self.send_ack_list(conn, acks) {
            error!(agent = %conn.agent_id(), "Failed to flush acks: {}", e);
        }
    }

    fn send_ack_list(&self, conn: &Connection, acks: Vec<u32>) -> Result<(), SendError> {
        let count = acks.len();
        trace!(agent = %conn.agent_id(), count, "Sending PacketAck");

        let packet = match PacketAck::new(acks.clone()).to_packet() {
            Ok(packet) => packet,
            Err(e) => {
                conn.lock_send().pending_acks_mut().requeue(acks);
                return Err(e.into());
            }
        };
        self.transmit(conn, packet, PacketCategory::Overhead, Attempt::First)?;
        conn.record_acks_sent(count);
        Ok(())
    }

    /// Resend or drop reliable packets that went unacknowledged too long
    ///
    /// A packet out of resends is dropped; if the connection has also been
    /// silent longer than the idle timeout the connection is removed and the
    /// scan stops.
    pub fn resend_scan(&self, conn: &Arc<Connection>) {
        let now = self.clock.now();
        let expired = conn.lock_send().expired(now, self.config.resend_timeout);

        for seq in expired {
            let mut send = conn.lock_send();
            let out = match send.unacked_mut(seq) {
                Some(out) => out,
                // Acked since the snapshot
                None => continue,
            };

            if out.resend_count < self.config.max_resends {
                out.resend_count += 1;
                out.sent_at = None;
                out.packet.header.resent = true;
                let packet = out.packet.clone();
                let category = out.category;
                let attempt = out.resend_count;
                drop(send);

                debug!(
                    agent = %conn.agent_id(),
                    seq,
                    attempt,
                    message = %packet.message_id,
                    "Resending reliable packet"
                );
                if let Err(e) = self.transmit(conn, packet, category, Attempt::Resend) {
                    error!(agent = %conn.agent_id(), seq, "Failed to resend packet: {}", e);
                }
            } else {
                let dropped = send.acknowledge(seq);
                drop(send);

                conn.record_dropped();
                if let Some(out) = dropped {
                    warn!(
                        agent = %conn.agent_id(),
                        seq,
                        message = %out.packet.message_id,
                        "Dropping reliable packet after {} resends",
                        out.resend_count
                    );
                }

                if conn.idle_for(now) > self.config.idle_timeout {
                    warn!(
                        agent = %conn.agent_id(),
                        addr = %conn.remote_addr(),
                        idle_ms = conn.idle_for(now).as_millis() as u64,
                        "Connection timed out, removing"
                    );
                    self.directory.remove_connection(conn);
                    break;
                }
            }
        }
    }

    /// Start the periodic ack flush and resend scan of a connection
    pub fn start_timer(self: &Arc<Self>, conn: &Arc<Connection>) -> io::Result<()> {
        let transport: Weak<OutboundTransport> = Arc::downgrade(self);
        let weak_conn: Weak<Connection> = Arc::downgrade(conn);

        let timer = TickTimer::spawn(
            format!("lludp-tick-{}", conn.circuit_code()),
            self.config.tick_interval,
            move || {
                let (transport, conn) = match (transport.upgrade(), weak_conn.upgrade()) {
                    (Some(transport), Some(conn)) => (transport, conn),
                    _ => return,
                };
                if !conn.is_active() {
                    return;
                }
                transport.flush_pending_acks(&conn);
                transport.resend_scan(&conn);
            },
        )?;

        conn.attach_timer(timer);
        Ok(())
    }

    fn transmit(
        &self,
        conn: &Connection,
        mut packet: Packet,
        category: PacketCategory,
        attempt: Attempt,
    ) -> Result<(), PacketError> {
        let now = self.clock.now();

        let bytes: BytesMut = {
            let mut send = conn.lock_send();

            match attempt {
                Attempt::First => {
                    // Committed only once the packet encodes
                    packet.header.sequence = send.peek_sequence();
                    packet.header.resent = false;

                    let mut piggybacked = false;
                    if packet.is_reliable()
                        && packet.message_id != MessageId::PACKET_ACK
                        && packet.header.ack_list.is_empty()
                    {
                        if let Some(acks) = send
                            .pending_acks_mut()
                            .take_if_at_most(self.config.max_appended_acks)
                        {
                            packet.header.ack_list = acks;
                            piggybacked = true;
                        }
                    }

                    let bytes = match packet.to_bytes() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            if piggybacked {
                                let acks = std::mem::take(&mut packet.header.ack_list);
                                send.pending_acks_mut().requeue(acks);
                            }
                            return Err(e);
                        }
                    };
                    send.next_sequence();

                    if packet.is_reliable() {
                        let seq = packet.sequence();
                        send.track(seq, OutgoingPacket::new(packet.clone(), category, now));
                    }
                    bytes
                }
                Attempt::Resend => {
                    let seq = packet.sequence();
                    let stripped = std::mem::take(&mut packet.header.ack_list);
                    if !stripped.is_empty() {
                        debug!(
                            agent = %conn.agent_id(),
                            seq,
                            count = stripped.len(),
                            "Purging appended acks from resent packet"
                        );
                        send.pending_acks_mut().requeue(stripped);
                    }

                    match send.unacked_mut(seq) {
                        Some(out) => {
                            out.packet.header.ack_list.clear();
                            out.sent_at = Some(now);
                        }
                        None => return Ok(()),
                    }

                    packet.to_bytes()?
                }
            }
        };

        match self.sink.send_datagram(&bytes, conn.remote_addr()) {
            Ok(_) => {
                trace!(
                    agent = %conn.agent_id(),
                    seq = packet.sequence(),
                    message = %packet.message_id,
                    len = bytes.len(),
                    "Sent packet"
                );
                conn.record_sent(category, bytes.len(), attempt == Attempt::First);
            }
            Err(e) => {
                warn!(
                    agent = %conn.agent_id(),
                    addr = %conn.remote_addr(),
                    seq = packet.sequence(),
                    "Socket send failed: {}",
                    e
                );
            }
        }
        Ok(())
    }
}
