//! End-to-end reliability scenarios over loopback
//!
//! A real server socket and a raw viewer socket, with time driven by a
//! manual clock so resend and idle behaviour is deterministic. Tick timers
//! are parked at an hour so the test drives every scan itself.

use lludp::io::{LludpSocket, ManualClock};
use lludp::protocol::{PacketAck, UseCircuitCode};
use lludp::{AgentId, MessageId, Packet, PacketCategory, Server, ServerError, TransportConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const AGENT: AgentId = AgentId::from_u128(0xA6E47);

struct Viewer {
    socket: LludpSocket,
}

impl Viewer {
    fn new() -> Self {
        let socket = LludpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        socket.set_read_timeout(Duration::from_millis(20)).unwrap();
        Viewer { socket }
    }

    fn send(&self, server: &Server, mut packet: Packet, seq: u32) {
        packet.header.sequence = seq;
        let bytes = packet.to_bytes().unwrap();
        self.socket.send_to(&bytes, server.local_addr()).unwrap();
    }

    /// Everything that arrives within `window`
    fn drain(&self, window: Duration) -> Vec<Packet> {
        let deadline = Instant::now() + window;
        let mut buf = [0u8; 4096];
        let mut packets = Vec::new();
        while Instant::now() < deadline {
            if let Some((len, _)) = self.socket.recv_from(&mut buf).unwrap() {
                packets.push(Packet::from_bytes(&buf[..len]).unwrap());
            }
        }
        packets
    }

    fn open_circuit(&self, server: &Server, code: u32, agent: AgentId) {
        server.register_circuit(code, agent).unwrap();
        let msg = UseCircuitCode {
            code,
            session_id: AgentId::from_u128(0x5E55),
            agent_id: agent,
        };
        self.send(server, msg.to_packet(), 1);
        assert!(wait_until(|| server.connection_stats(agent).is_some()));
    }
}

fn start_server() -> (Server, ManualClock) {
    let config = TransportConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        tick_interval: Duration::from_secs(3600),
        recv_timeout: Duration::from_millis(20),
        ..Default::default()
    };
    let clock = ManualClock::new();
    let server = Server::bind_with_clock(config, Arc::new(clock.clone())).unwrap();
    (server, clock)
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn non_ack(packets: Vec<Packet>) -> Vec<Packet> {
    packets
        .into_iter()
        .filter(|p| p.message_id != MessageId::PACKET_ACK)
        .collect()
}

#[test]
fn test_first_sends_numbered_from_one() {
    let (server, _clock) = start_server();
    let viewer = Viewer::new();
    viewer.open_circuit(&server, 42, AGENT);

    for _ in 0..2 {
        server
            .send_packet(
                AGENT,
                Packet::new(MessageId::High(50), vec![0xAB]).reliable(),
                PacketCategory::State,
            )
            .unwrap();
    }

    let received = non_ack(viewer.drain(Duration::from_millis(200)));
    let sequences: Vec<u32> = received.iter().map(|p| p.sequence()).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert!(received.iter().all(|p| p.is_reliable() && !p.is_resent()));
}

#[test]
fn test_unacked_packet_resent_three_times_then_dropped() {
    let (server, clock) = start_server();
    let viewer = Viewer::new();
    viewer.open_circuit(&server, 43, AGENT);
    let conn = server.directory().lookup_by_identity(AGENT).unwrap();

    server
        .send_packet(
            AGENT,
            Packet::new(MessageId::Medium(12), vec![1, 2, 3]).reliable(),
            PacketCategory::Asset,
        )
        .unwrap();
    assert_eq!(non_ack(viewer.drain(Duration::from_millis(100))).len(), 1);

    for attempt in 1..=3 {
        clock.advance_ms(4001);
        server.outbound().resend_scan(&conn);

        let resent = non_ack(viewer.drain(Duration::from_millis(100)));
        assert_eq!(resent.len(), 1, "resend {}", attempt);
        assert!(resent[0].is_resent());
        assert_eq!(resent[0].sequence(), 1);
        assert_eq!(&resent[0].body[..], &[1, 2, 3]);
    }

    clock.advance_ms(4001);
    server.outbound().resend_scan(&conn);
    assert!(non_ack(viewer.drain(Duration::from_millis(100))).is_empty());
    assert_eq!(conn.lock_send().unacked_len(), 0);

    let stats = server.connection_stats(AGENT).unwrap();
    assert_eq!(stats.packets_resent, 3);
    assert_eq!(stats.packets_dropped, 1);
    assert_eq!(stats.sent_in(PacketCategory::Asset), 1);
}

#[test]
fn test_ack_batch_precedes_dispatch_of_eleventh() {
    let (server, _clock) = start_server();
    let viewer = Viewer::new();
    viewer.open_circuit(&server, 44, AGENT);

    // Settle the ack owed for the handshake first
    let conn = server.directory().lookup_by_identity(AGENT).unwrap();
    server.outbound().flush_pending_acks(&conn);
    viewer.drain(Duration::from_millis(100));

    let acks_at_dispatch = Arc::new(Mutex::new(Vec::new()));
    let seen = acks_at_dispatch.clone();
    let directory = server.directory().clone();
    server.register_packet_callback(MessageId::High(60), move |packet, agent| {
        if let Some(conn) = directory.lookup_by_identity(agent) {
            seen.lock().push((packet.sequence(), conn.stats().acks_sent));
        }
        Ok(())
    });

    for seq in 2..=12 {
        viewer.send(&server, Packet::new(MessageId::High(60), vec![]).reliable(), seq);
    }
    assert!(wait_until(|| acks_at_dispatch.lock().len() == 11));

    let batches: Vec<PacketAck> = viewer
        .drain(Duration::from_millis(200))
        .iter()
        .filter(|p| p.message_id == MessageId::PACKET_ACK)
        .map(|p| PacketAck::from_packet(p).unwrap())
        .collect();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].ids, (2..=11).collect::<Vec<u32>>());

    // The handshake ack plus the batch of ten were out before 12 reached callbacks
    let dispatched = acks_at_dispatch.lock();
    let (last_seq, acks_sent) = dispatched[10];
    assert_eq!(last_seq, 12);
    assert_eq!(acks_sent, 11);

    let send = conn.lock_send();
    assert_eq!(send.pending_acks().len(), 1);
    assert!(send.pending_acks().contains(12));
}

#[test]
fn test_idle_connection_reaped_after_drop() {
    let (server, clock) = start_server();
    let viewer = Viewer::new();
    viewer.open_circuit(&server, 45, AGENT);
    let conn = server.directory().lookup_by_identity(AGENT).unwrap();
    assert!(conn.has_timer());

    server
        .send_packet(
            AGENT,
            Packet::new(MessageId::High(70), vec![]).reliable(),
            PacketCategory::Texture,
        )
        .unwrap();

    clock.advance_ms(61_000);
    for _ in 0..4 {
        server.outbound().resend_scan(&conn);
        clock.advance_ms(4001);
    }

    assert!(conn.is_removed());
    assert!(!conn.has_timer());
    assert!(server.directory().lookup_by_identity(AGENT).is_none());
    assert!(server
        .directory()
        .lookup_by_address(viewer.socket.local_addr().unwrap())
        .is_none());
    assert!(matches!(
        server.send_packet(
            AGENT,
            Packet::new(MessageId::High(70), vec![]),
            PacketCategory::Texture
        ),
        Err(ServerError::NotConnected(agent)) if agent == AGENT
    ));
}

#[test]
fn test_duplicates_suppressed_from_dispatch() {
    let (server, _clock) = start_server();
    let viewer = Viewer::new();
    viewer.open_circuit(&server, 46, AGENT);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    server.register_packet_callback(MessageId::Low(900), move |packet, _| {
        s.lock().push(packet.sequence());
        Ok(())
    });

    let original = Packet::new(MessageId::Low(900), vec![4]).reliable();
    let mut resent = original.clone();
    resent.header.resent = true;

    viewer.send(&server, original.clone(), 7);
    viewer.send(&server, resent, 7);
    viewer.send(&server, original, 7);
    viewer.send(&server, Packet::new(MessageId::Low(900), vec![5]).reliable(), 8);

    assert!(wait_until(|| seen.lock().len() == 2));
    assert!(wait_until(|| server
        .connection_stats(AGENT)
        .map(|s| s.duplicates == 2)
        .unwrap_or(false)));
    assert_eq!(*seen.lock(), vec![7, 8]);
}

#[test]
fn test_oversized_datagram_cannot_ack() {
    let (server, _clock) = start_server();
    let viewer = Viewer::new();
    viewer.open_circuit(&server, 47, AGENT);
    let conn = server.directory().lookup_by_identity(AGENT).unwrap();

    server
        .send_packet(
            AGENT,
            Packet::new(MessageId::High(80), vec![]).reliable(),
            PacketCategory::State,
        )
        .unwrap();
    assert!(conn.lock_send().is_unacked(1));

    // 5000 bytes flagged with appended acks. Cut at 4096 the tail would
    // read as an ack of sequence 1; the real trailer byte is 0xAA.
    let mut datagram = vec![0xAAu8; 5000];
    datagram[0] = 0x10;
    datagram[1..5].copy_from_slice(&2u32.to_be_bytes());
    datagram[5] = 0;
    datagram[6] = 99;
    datagram[4091..4095].copy_from_slice(&1u32.to_be_bytes());
    datagram[4095] = 1;
    viewer
        .socket
        .send_to(&datagram, server.local_addr())
        .unwrap();

    // A small packet behind it marks when the oversized one has been handled
    viewer.send(&server, Packet::new(MessageId::High(81), vec![]), 3);
    assert!(wait_until(|| server
        .connection_stats(AGENT)
        .map(|s| s.packets_received == 2)
        .unwrap_or(false)));

    assert!(conn.lock_send().is_unacked(1));
    assert_eq!(server.connection_stats(AGENT).unwrap().packets_received, 2);
}
