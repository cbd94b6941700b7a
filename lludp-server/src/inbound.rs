//! Inbound Pipeline
//!
//! Two stages joined by a bounded queue. The receive stage decodes
//! datagrams, resolves the sending connection, refreshes its activity and
//! queues acks for reliable packets. The worker stage suppresses duplicates,
//! reconciles acks against the unacked table and dispatches to callbacks.
//! Both stages see packets in arrival order.

use crate::config::TransportConfig;
use crate::directory::ConnectionDirectory;
use crate::dispatcher::Dispatcher;
use crate::outbound::OutboundTransport;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use lludp_io::{Clock, LludpSocket};
use lludp_protocol::{Connection, MessageId, Packet, PacketAck, UseCircuitCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// How long the worker waits on an empty queue before checking for shutdown
const WORKER_POLL: Duration = Duration::from_millis(100);

/// A decoded packet and the connection it arrived on
#[derive(Debug, Clone)]
pub struct IncomingPacket {
    pub connection: Arc<Connection>,
    pub packet: Packet,
}

/// Receive loop, inbound queue and worker
pub struct InboundPipeline {
    directory: Arc<ConnectionDirectory>,
    outbound: Arc<OutboundTransport>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    config: TransportConfig,
    inbox_tx: Sender<IncomingPacket>,
    inbox_rx: Receiver<IncomingPacket>,
}

impl InboundPipeline {
    pub fn new(
        directory: Arc<ConnectionDirectory>,
        outbound: Arc<OutboundTransport>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        config: TransportConfig,
    ) -> Self {
        let (inbox_tx, inbox_rx) = channel::bounded(config.inbox_capacity);
        InboundPipeline {
            directory,
            outbound,
            dispatcher,
            clock,
            config,
            inbox_tx,
            inbox_rx,
        }
    }

    /// Receive-stage handling of one datagram
    ///
    /// Returns the packet to queue for the worker, or `None` if it was
    /// discarded. Datagrams longer than the receive buffer are discarded
    /// since their ack trailer cannot be trusted.
    pub fn handle_datagram(&self, data: &[u8], addr: SocketAddr) -> Option<IncomingPacket> {
        if data.len() > self.config.recv_buffer_size {
            warn!(
                addr = %addr,
                len = data.len(),
                max = self.config.recv_buffer_size,
                "Discarding oversized datagram"
            );
            return None;
        }

        let packet = match Packet::from_bytes(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(addr = %addr, len = data.len(), "Failed to decode packet: {}", e);
                return None;
            }
        };

        let conn = if packet.message_id == MessageId::USE_CIRCUIT_CODE {
            self.resolve_circuit(&packet, addr)?
        } else {
            match self.directory.lookup_by_address(addr) {
                Some(conn) => conn,
                None => {
                    warn!(
                        addr = %addr,
                        message = %packet.message_id,
                        "Received packet from an unrecognized source"
                    );
                    return None;
                }
            }
        };

        conn.touch(self.clock.now());
        conn.record_received(data.len());

        if packet.is_reliable() {
            let pending = conn.lock_send().pending_acks_mut().queue(packet.sequence());
            if pending >= self.config.ack_threshold {
                self.outbound.flush_pending_acks(&conn);
            }
        }

        trace!(
            agent = %conn.agent_id(),
            seq = packet.sequence(),
            message = %packet.message_id,
            "Received packet"
        );
        Some(IncomingPacket {
            connection: conn,
            packet,
        })
    }

    fn resolve_circuit(&self, packet: &Packet, addr: SocketAddr) -> Option<Arc<Connection>> {
        let msg = match UseCircuitCode::from_packet(packet) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(addr = %addr, "Malformed UseCircuitCode: {}", e);
                return None;
            }
        };

        // Retransmitted handshake on a circuit that is already up
        if let Some(conn) = self.directory.lookup_by_address(addr) {
            if conn.circuit_code() == msg.code {
                debug!(code = msg.code, addr = %addr, "UseCircuitCode for active circuit");
                return Some(conn);
            }
        }

        match self.directory.complete_handshake(msg.code, addr) {
            Ok(conn) => {
                if let Err(e) = self.outbound.start_timer(&conn) {
                    error!(agent = %conn.agent_id(), "Failed to start connection timer: {}", e);
                }
                Some(conn)
            }
            Err(e) => {
                warn!(code = msg.code, addr = %addr, "Rejected UseCircuitCode: {}", e);
                None
            }
        }
    }

    /// Worker-stage handling of one queued packet
    ///
    /// Returns the number of callbacks the packet was dispatched to.
    pub fn process(&self, item: IncomingPacket) -> usize {
        let IncomingPacket {
            connection: conn,
            packet,
        } = item;
        let seq = packet.sequence();

        {
            let mut archive = conn.archive();
            if archive.contains(seq) {
                drop(archive);
                conn.record_duplicate();
                if packet.is_resent() {
                    debug!(agent = %conn.agent_id(), seq, "Received resent packet");
                } else {
                    warn!(
                        agent = %conn.agent_id(),
                        seq,
                        message = %packet.message_id,
                        "Received a duplicate of packet"
                    );
                }
                return 0;
            }
            archive.insert(seq);
        }

        self.reconcile_acks(&conn, &packet);

        if conn.is_removed() {
            debug!(agent = %conn.agent_id(), seq, "Skipping dispatch for removed circuit");
            return 0;
        }
        self.dispatcher.dispatch(&packet, conn.agent_id())
    }

    fn reconcile_acks(&self, conn: &Connection, packet: &Packet) {
        let body_acks = if packet.message_id == MessageId::PACKET_ACK {
            match PacketAck::from_packet(packet) {
                Ok(ack) => ack.ids,
                Err(e) => {
                    warn!(agent = %conn.agent_id(), "Malformed PacketAck: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        if packet.header.ack_list.is_empty() && body_acks.is_empty() {
            return;
        }

        let mut send = conn.lock_send();
        for ack in packet.header.ack_list.iter().chain(body_acks.iter()) {
            if send.acknowledge(*ack).is_some() {
                trace!(agent = %conn.agent_id(), seq = *ack, "Packet acknowledged");
            }
        }
    }

    /// Queue a packet for the worker, blocking while the queue is full
    ///
    /// Gives up and returns false once `running` is cleared.
    pub fn enqueue(&self, item: IncomingPacket, running: &AtomicBool) -> bool {
        let mut item = item;
        loop {
            match self.inbox_tx.send_timeout(item, self.config.recv_timeout) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if !running.load(Ordering::Acquire) {
                        return false;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Number of packets waiting for the worker
    pub fn queued(&self) -> usize {
        self.inbox_rx.len()
    }

    /// Body of the receive thread
    pub fn run_receive_loop(&self, socket: &LludpSocket, running: &AtomicBool) {
        // One spare byte so a truncated datagram shows up as oversized
        let mut buf = vec![0u8; self.config.recv_buffer_size + 1];

        while running.load(Ordering::Acquire) {
            match socket.recv_from(&mut buf) {
                Ok(Some((len, addr))) => {
                    if let Some(item) = self.handle_datagram(&buf[..len], addr) {
                        if !self.enqueue(item, running) {
                            break;
                        }
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    warn!("Socket receive failed: {}", e);
                }
            }
        }

        debug!("Receive loop stopped");
    }

    /// Body of the worker thread
    pub fn run_worker_loop(&self, running: &AtomicBool) {
        while running.load(Ordering::Acquire) {
            match self.inbox_rx.recv_timeout(WORKER_POLL) {
                Ok(item) => {
                    self.process(item);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("Worker loop stopped");
    }
}
