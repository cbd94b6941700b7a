//! LLUDP Packet Structures and Serialization
//!
//! A packet on the wire is a 6-byte header (flags, big-endian sequence
//! number, extra-header length), the extra header bytes, a variable-length
//! message id, the message body and, when the appended-acks flag is set, a
//! trailer of acknowledged sequence numbers followed by a count byte.
//!
//! ```text
//! +-------+-----------+-------+-------+------------+------+-----------+-------+
//! | flags | sequence  | extra | extra | message id | body | acks ...  | count |
//! |  u8   |  u32 BE   |  len  | bytes | 1, 2 or 4  |      | u32 BE    |  u8   |
//! +-------+-----------+-------+-------+------------+------+-----------+-------+
//! ```
//!
//! Everything between the 6-byte prefix and the ack trailer is zero-encoded
//! when the zerocoded flag is set.

use crate::zerocode;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the fixed header prefix (flags + sequence + extra length)
pub const HEADER_SIZE: usize = 6;

/// Maximum number of sequence numbers one packet can carry in its ack trailer
pub const MAX_APPENDED_ACKS: usize = 255;

/// Largest packet the server expects to put on the wire
pub const MAX_PACKET_SIZE: usize = 1200;

/// Body is zero-encoded
pub const MSG_ZEROCODED: u8 = 0x80;
/// Sender expects an acknowledgement
pub const MSG_RELIABLE: u8 = 0x40;
/// Packet is a retransmission
pub const MSG_RESENT: u8 = 0x20;
/// Packet carries an ack trailer
pub const MSG_APPENDED_ACKS: u8 = 0x10;

/// Message identifier
///
/// Identifiers come in three frequency classes with different encoded
/// widths. Fixed messages (`0xFFFFFFxx`) are Low ids in the `0xFFxx` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageId {
    /// One byte, `0x01..=0xFE`
    High(u8),
    /// `0xFF` followed by one byte
    Medium(u8),
    /// `0xFF 0xFF` followed by a big-endian u16
    Low(u16),
}

impl MessageId {
    pub const START_PING_CHECK: MessageId = MessageId::High(1);
    pub const COMPLETE_PING_CHECK: MessageId = MessageId::High(2);
    pub const USE_CIRCUIT_CODE: MessageId = MessageId::Low(3);
    pub const LOGOUT_REQUEST: MessageId = MessageId::Low(252);
    pub const PACKET_ACK: MessageId = MessageId::Low(0xFFFB);
    pub const OPEN_CIRCUIT: MessageId = MessageId::Low(0xFFFC);
    pub const CLOSE_CIRCUIT: MessageId = MessageId::Low(0xFFFD);

    /// Number of bytes this id occupies on the wire
    pub fn encoded_len(self) -> usize {
        match self {
            MessageId::High(_) => 1,
            MessageId::Medium(_) => 2,
            MessageId::Low(_) => 4,
        }
    }

    /// Name of the transport-level messages this crate knows about
    pub fn name(self) -> Option<&'static str> {
        match self {
            MessageId::START_PING_CHECK => Some("StartPingCheck"),
            MessageId::COMPLETE_PING_CHECK => Some("CompletePingCheck"),
            MessageId::USE_CIRCUIT_CODE => Some("UseCircuitCode"),
            MessageId::LOGOUT_REQUEST => Some("LogoutRequest"),
            MessageId::PACKET_ACK => Some("PacketAck"),
            MessageId::OPEN_CIRCUIT => Some("OpenCircuit"),
            MessageId::CLOSE_CIRCUIT => Some("CloseCircuit"),
            _ => None,
        }
    }

    fn write_to(self, buf: &mut BytesMut) -> Result<(), PacketError> {
        match self {
            MessageId::High(id) if id == 0 || id == 0xFF => {
                return Err(PacketError::InvalidMessageId(self));
            }
            MessageId::Medium(0xFF) => return Err(PacketError::InvalidMessageId(self)),
            MessageId::High(id) => buf.put_u8(id),
            MessageId::Medium(id) => {
                buf.put_u8(0xFF);
                buf.put_u8(id);
            }
            MessageId::Low(id) => {
                buf.put_u16(0xFFFF);
                buf.put_u16(id);
            }
        }
        Ok(())
    }

    fn read_from(bytes: &[u8]) -> Result<Self, PacketError> {
        let truncated = |expected: usize| PacketError::InsufficientData {
            expected,
            actual: bytes.len(),
        };

        match bytes {
            [] => Err(truncated(1)),
            [0xFF, 0xFF, hi, lo, ..] => Ok(MessageId::Low(u16::from_be_bytes([*hi, *lo]))),
            [0xFF, 0xFF, ..] => Err(truncated(4)),
            [0xFF, id, ..] => Ok(MessageId::Medium(*id)),
            [0xFF] => Err(truncated(2)),
            [id, ..] => Ok(MessageId::High(*id)),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name() {
            return write!(f, "{}", name);
        }
        match self {
            MessageId::High(id) => write!(f, "High({})", id),
            MessageId::Medium(id) => write!(f, "Medium({})", id),
            MessageId::Low(id) => write!(f, "Low({})", id),
        }
    }
}

/// Packet header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Sequence number assigned by the sender
    pub sequence: u32,
    /// Receiver must acknowledge this packet
    pub reliable: bool,
    /// This is a retransmission of an earlier packet
    pub resent: bool,
    /// Body is zero-encoded on the wire
    pub zerocoded: bool,
    /// Extra header bytes (rarely used, carried opaquely)
    pub extra: Bytes,
    /// Sequence numbers acknowledged by this packet
    pub ack_list: Vec<u32>,
}

impl PacketHeader {
    /// Whether the ack trailer is present
    #[inline]
    pub fn appended_acks(&self) -> bool {
        !self.ack_list.is_empty()
    }

    /// Wire flags byte
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.zerocoded {
            flags |= MSG_ZEROCODED;
        }
        if self.reliable {
            flags |= MSG_RELIABLE;
        }
        if self.resent {
            flags |= MSG_RESENT;
        }
        if self.appended_acks() {
            flags |= MSG_APPENDED_ACKS;
        }
        flags
    }
}

/// A decoded packet with an opaque body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub message_id: MessageId,
    pub body: Bytes,
}

impl Packet {
    /// Create an unreliable, uncompressed packet
    pub fn new(message_id: MessageId, body: impl Into<Bytes>) -> Self {
        Packet {
            header: PacketHeader::default(),
            message_id,
            body: body.into(),
        }
    }

    /// Mark the packet reliable
    pub fn reliable(mut self) -> Self {
        self.header.reliable = true;
        self
    }

    /// Request zero-encoding on the wire
    pub fn zerocoded(mut self) -> Self {
        self.header.zerocoded = true;
        self
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    #[inline]
    pub fn is_reliable(&self) -> bool {
        self.header.reliable
    }

    #[inline]
    pub fn is_resent(&self) -> bool {
        self.header.resent
    }

    /// Serialize the packet, zero-encoding it if the header asks for it
    pub fn to_bytes(&self) -> Result<BytesMut, PacketError> {
        let acks = &self.header.ack_list;
        if acks.len() > MAX_APPENDED_ACKS {
            return Err(PacketError::TooManyAcks {
                count: acks.len(),
                max: MAX_APPENDED_ACKS,
            });
        }
        if self.header.extra.len() > u8::MAX as usize {
            return Err(PacketError::ExtraHeaderTooLarge(self.header.extra.len()));
        }

        let mut content = BytesMut::with_capacity(
            self.header.extra.len() + self.message_id.encoded_len() + self.body.len(),
        );
        content.put_slice(&self.header.extra);
        self.message_id.write_to(&mut content)?;
        content.put_slice(&self.body);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + content.len() * 2 + acks.len() * 4 + 1);
        buf.put_u8(self.header.flags());
        buf.put_u32(self.header.sequence);
        buf.put_u8(self.header.extra.len() as u8);

        if self.header.zerocoded {
            zerocode::encode(&content, &mut buf);
        } else {
            buf.put_slice(&content);
        }

        if !acks.is_empty() {
            for ack in acks {
                buf.put_u32(*ack);
            }
            buf.put_u8(acks.len() as u8);
        }

        Ok(buf)
    }

    /// Parse a packet from a received datagram
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE + 1 {
            return Err(PacketError::InsufficientData {
                expected: HEADER_SIZE + 1,
                actual: bytes.len(),
            });
        }

        let flags = bytes[0];
        let mut end = bytes.len();

        let mut ack_list = Vec::new();
        if flags & MSG_APPENDED_ACKS != 0 {
            let count = bytes[end - 1] as usize;
            let trailer = count * 4 + 1;
            if end < HEADER_SIZE + 1 + trailer {
                return Err(PacketError::InsufficientData {
                    expected: HEADER_SIZE + 1 + trailer,
                    actual: end,
                });
            }
            end -= trailer;
            let mut acks = &bytes[end..bytes.len() - 1];
            ack_list.reserve(count);
            while acks.remaining() >= 4 {
                ack_list.push(acks.get_u32());
            }
        }

        let mut prefix = &bytes[..HEADER_SIZE];
        prefix.advance(1);
        let sequence = prefix.get_u32();
        let extra_len = prefix.get_u8() as usize;

        let content: Bytes = if flags & MSG_ZEROCODED != 0 {
            let mut decoded = BytesMut::with_capacity((end - HEADER_SIZE) * 2);
            zerocode::decode(&bytes[HEADER_SIZE..end], &mut decoded)?;
            decoded.freeze()
        } else {
            Bytes::copy_from_slice(&bytes[HEADER_SIZE..end])
        };

        if content.len() < extra_len {
            return Err(PacketError::InsufficientData {
                expected: extra_len,
                actual: content.len(),
            });
        }
        let extra = content.slice(..extra_len);
        let message_id = MessageId::read_from(&content[extra_len..])?;
        let body = content.slice(extra_len + message_id.encoded_len()..);

        Ok(Packet {
            header: PacketHeader {
                sequence,
                reliable: flags & MSG_RELIABLE != 0,
                resent: flags & MSG_RESENT != 0,
                zerocoded: flags & MSG_ZEROCODED != 0,
                extra,
                ack_list,
            },
            message_id,
            body,
        })
    }
}

/// Packet parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Invalid message id: {0:?}")]
    InvalidMessageId(MessageId),

    #[error("Zero run at offset {offset} is missing its count byte")]
    TruncatedZeroRun { offset: usize },

    #[error("Too many appended acks: {count} (max {max})")]
    TooManyAcks { count: usize, max: usize },

    #[error("Extra header too large: {0} bytes")]
    ExtraHeaderTooLarge(usize),

    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: MessageId,
        actual: MessageId,
    },
}
