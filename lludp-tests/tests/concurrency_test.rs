//! Multi-threaded sends and handshakes
//!
//! Sequence assignment per connection must stay gap-free and unique under
//! concurrent senders, and concurrent handshakes must leave both directory
//! maps consistent.

use lludp_io::{CaptureSink, ManualClock};
use lludp_protocol::{AgentId, MessageId, Packet, PacketCategory};
use lludp_server::{ConnectionDirectory, OutboundTransport, TransportConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn setup() -> (Arc<CaptureSink>, Arc<ConnectionDirectory>, Arc<OutboundTransport>) {
    let config = TransportConfig {
        tick_interval: Duration::from_secs(3600),
        ..Default::default()
    };
    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(CaptureSink::new());
    let directory = Arc::new(ConnectionDirectory::new(
        config.connection_settings(),
        clock.clone(),
    ));
    let outbound = Arc::new(OutboundTransport::new(
        directory.clone(),
        sink.clone(),
        clock,
        config,
    ));
    (sink, directory, outbound)
}

#[test]
fn test_concurrent_senders_get_unique_sequences() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let (sink, directory, outbound) = setup();
    let agent = AgentId::from_u128(0xC0);
    directory.register_pending(1, agent).unwrap();
    let conn = directory
        .complete_handshake(1, SocketAddr::from(([127, 0, 0, 1], 16000)))
        .unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let outbound = outbound.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    let packet = Packet::new(MessageId::High(10), vec![t as u8]).reliable();
                    outbound.send(agent, packet, PacketCategory::State).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut sequences: Vec<u32> = sink
        .take()
        .iter()
        .map(|(bytes, _)| Packet::from_bytes(bytes).unwrap().sequence())
        .collect();
    sequences.sort_unstable();

    let total = (THREADS * PER_THREAD) as u32;
    assert_eq!(sequences, (1..=total).collect::<Vec<u32>>());
    assert_eq!(conn.lock_send().unacked_len(), THREADS * PER_THREAD);
    assert_eq!(conn.lock_send().current_sequence(), total);
}

#[test]
fn test_concurrent_handshakes_keep_maps_consistent() {
    const CIRCUITS: u32 = 32;

    let (_sink, directory, _outbound) = setup();
    for code in 1..=CIRCUITS {
        directory
            .register_pending(code, AgentId::from_u128(code as u128))
            .unwrap();
    }

    let handles: Vec<_> = (1..=CIRCUITS)
        .map(|code| {
            let directory = directory.clone();
            thread::spawn(move || {
                let addr = SocketAddr::from(([127, 0, 0, 1], 20000 + code as u16));
                directory.complete_handshake(code, addr).unwrap()
            })
        })
        .collect();
    let conns: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(directory.len(), CIRCUITS as usize);
    assert_eq!(directory.pending_count(), 0);

    for conn in &conns {
        let by_agent = directory.lookup_by_identity(conn.agent_id()).unwrap();
        let by_addr = directory.lookup_by_address(conn.remote_addr()).unwrap();
        assert!(Arc::ptr_eq(&by_agent, conn));
        assert!(Arc::ptr_eq(&by_addr, conn));
        assert!(conn.is_active());
    }
    directory.clear();
}
