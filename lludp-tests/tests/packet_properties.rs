//! Property-based tests for LLUDP packet framing
//!
//! Random packets must survive serialization unchanged, zero-encoding must
//! be lossless, and the decoder must never panic on arbitrary input.

use bytes::{Bytes, BytesMut};
use lludp_protocol::packet::{MessageId, Packet, PacketHeader, MAX_APPENDED_ACKS};
use lludp_protocol::zerocode;
use proptest::prelude::*;

fn message_id_strategy() -> impl Strategy<Value = MessageId> {
    prop_oneof![
        (1u8..=0xFE).prop_map(MessageId::High),
        (0u8..=0xFE).prop_map(MessageId::Medium),
        any::<u16>().prop_map(MessageId::Low),
    ]
}

/// Bodies biased towards zero runs so the zero-encoder has work to do
fn body_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(prop_oneof![3 => Just(0u8), 1 => any::<u8>()], 0..=600)
        .prop_map(Bytes::from)
}

fn packet_strategy() -> impl Strategy<Value = Packet> {
    (
        any::<u32>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        prop::collection::vec(any::<u8>(), 0..=8),
        prop::collection::vec(any::<u32>(), 0..=MAX_APPENDED_ACKS),
        message_id_strategy(),
        body_strategy(),
    )
        .prop_map(
            |(sequence, reliable, resent, zerocoded, extra, ack_list, message_id, body)| Packet {
                header: PacketHeader {
                    sequence,
                    reliable,
                    resent,
                    zerocoded,
                    extra: Bytes::from(extra),
                    ack_list,
                },
                message_id,
                body,
            },
        )
}

proptest! {
    #[test]
    fn prop_packet_roundtrip(packet in packet_strategy()) {
        let bytes = packet.to_bytes().unwrap();
        let decoded = Packet::from_bytes(&bytes).unwrap();
        prop_assert_eq!(decoded, packet);
    }

    #[test]
    fn prop_zerocode_roundtrip(data in prop::collection::vec(prop_oneof![Just(0u8), any::<u8>()], 0..=2048)) {
        let mut encoded = BytesMut::new();
        zerocode::encode(&data, &mut encoded);

        // A zero is always followed by its run length
        if let Some(&last) = encoded.last() {
            prop_assert_ne!(last, 0);
        }

        let mut decoded = BytesMut::new();
        zerocode::decode(&encoded, &mut decoded).unwrap();
        prop_assert_eq!(&decoded[..], &data[..]);
    }

    #[test]
    fn prop_zerocode_never_grows_past_double(data in prop::collection::vec(any::<u8>(), 0..=1024)) {
        let mut encoded = BytesMut::new();
        zerocode::encode(&data, &mut encoded);
        prop_assert!(encoded.len() <= data.len() * 2);
    }

    #[test]
    fn prop_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..=256)) {
        let _ = Packet::from_bytes(&data);
    }

    #[test]
    fn prop_zero_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..=256)) {
        let mut out = BytesMut::new();
        let _ = zerocode::decode(&data, &mut out);
    }

    #[test]
    fn prop_flags_reflect_header(packet in packet_strategy()) {
        let bytes = packet.to_bytes().unwrap();
        prop_assert_eq!(bytes[0], packet.header.flags());
        prop_assert_eq!(bytes[0] & 0x10 != 0, !packet.header.ack_list.is_empty());
        prop_assert_eq!(bytes[0] & 0x40 != 0, packet.header.reliable);
    }
}
