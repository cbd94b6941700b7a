//! Transport-level message bodies
//!
//! The transport interprets only the handful of messages it needs for
//! circuit setup, acknowledgement and liveness. Every other message body is
//! carried opaquely. Body fields are little-endian, unlike the header.

use crate::agent::AgentId;
use crate::packet::{MessageId, Packet, PacketError};
use bytes::{Buf, BufMut, BytesMut};

fn expect_id(packet: &Packet, expected: MessageId) -> Result<(), PacketError> {
    if packet.message_id != expected {
        return Err(PacketError::UnexpectedMessage {
            expected,
            actual: packet.message_id,
        });
    }
    Ok(())
}

fn need(body: &[u8], expected: usize) -> Result<(), PacketError> {
    if body.len() < expected {
        return Err(PacketError::InsufficientData {
            expected,
            actual: body.len(),
        });
    }
    Ok(())
}

/// Standalone acknowledgement of one or more sequence numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketAck {
    pub ids: Vec<u32>,
}

impl PacketAck {
    /// Largest number of ids one PacketAck body can hold
    pub const MAX_IDS: usize = u8::MAX as usize;

    pub fn new(ids: Vec<u32>) -> Self {
        PacketAck { ids }
    }

    /// Build the unreliable packet carrying these acks
    pub fn to_packet(&self) -> Result<Packet, PacketError> {
        if self.ids.len() > Self::MAX_IDS {
            return Err(PacketError::TooManyAcks {
                count: self.ids.len(),
                max: Self::MAX_IDS,
            });
        }

        let mut body = BytesMut::with_capacity(1 + self.ids.len() * 4);
        body.put_u8(self.ids.len() as u8);
        for id in &self.ids {
            body.put_u32_le(*id);
        }
        Ok(Packet::new(MessageId::PACKET_ACK, body.freeze()))
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, PacketError> {
        expect_id(packet, MessageId::PACKET_ACK)?;

        let mut body = &packet.body[..];
        need(body, 1)?;
        let count = body.get_u8() as usize;
        need(body, count * 4)?;

        let ids = (0..count).map(|_| body.get_u32_le()).collect();
        Ok(PacketAck { ids })
    }
}

/// First packet of a circuit, binding a pre-authorised session to an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseCircuitCode {
    pub code: u32,
    pub session_id: AgentId,
    pub agent_id: AgentId,
}

impl UseCircuitCode {
    const BODY_LEN: usize = 4 + 16 + 16;

    pub fn to_packet(&self) -> Packet {
        let mut body = BytesMut::with_capacity(Self::BODY_LEN);
        body.put_u32_le(self.code);
        body.put_slice(&self.session_id.to_bytes());
        body.put_slice(&self.agent_id.to_bytes());
        Packet::new(MessageId::USE_CIRCUIT_CODE, body.freeze()).reliable()
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, PacketError> {
        expect_id(packet, MessageId::USE_CIRCUIT_CODE)?;

        let mut body = &packet.body[..];
        need(body, Self::BODY_LEN)?;

        let code = body.get_u32_le();
        let mut session = [0u8; 16];
        body.copy_to_slice(&mut session);
        let mut agent = [0u8; 16];
        body.copy_to_slice(&mut agent);

        Ok(UseCircuitCode {
            code,
            session_id: AgentId::from_bytes(session),
            agent_id: AgentId::from_bytes(agent),
        })
    }
}

/// Liveness check sent by the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPingCheck {
    pub ping_id: u8,
    /// Oldest sequence number the sender still waits an ack for
    pub oldest_unacked: u32,
}

impl StartPingCheck {
    pub fn to_packet(&self) -> Packet {
        let mut body = BytesMut::with_capacity(5);
        body.put_u8(self.ping_id);
        body.put_u32_le(self.oldest_unacked);
        Packet::new(MessageId::START_PING_CHECK, body.freeze())
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, PacketError> {
        expect_id(packet, MessageId::START_PING_CHECK)?;

        let mut body = &packet.body[..];
        need(body, 5)?;
        Ok(StartPingCheck {
            ping_id: body.get_u8(),
            oldest_unacked: body.get_u32_le(),
        })
    }
}

/// Reply to [`StartPingCheck`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletePingCheck {
    pub ping_id: u8,
}

impl CompletePingCheck {
    pub fn to_packet(&self) -> Packet {
        Packet::new(MessageId::COMPLETE_PING_CHECK, vec![self.ping_id])
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, PacketError> {
        expect_id(packet, MessageId::COMPLETE_PING_CHECK)?;
        need(&packet.body, 1)?;
        Ok(CompletePingCheck {
            ping_id: packet.body[0],
        })
    }
}

/// Circuit teardown notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloseCircuit;

impl CloseCircuit {
    pub fn to_packet(&self) -> Packet {
        Packet::new(MessageId::CLOSE_CIRCUIT, bytes::Bytes::new())
    }
}
