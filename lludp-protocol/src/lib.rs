//! LLUDP Protocol Core Implementation
//!
//! This crate implements the core of the legacy virtual-world UDP protocol:
//! packet framing, zero-encoding, the transport-level message bodies,
//! sequence numbering, duplicate detection, pending ACK bookkeeping and the
//! per-client connection state.

pub mod ack;
pub mod agent;
pub mod archive;
pub mod connection;
pub mod message;
pub mod packet;
pub mod sequence;
pub mod zerocode;

pub use ack::PendingAcks;
pub use agent::{AgentId, ParseAgentIdError};
pub use archive::PacketArchive;
pub use connection::{
    Connection, ConnectionError, ConnectionSettings, ConnectionState, ConnectionStats,
    OutgoingPacket, PacketCategory, SendState,
};
pub use message::{CloseCircuit, CompletePingCheck, PacketAck, StartPingCheck, UseCircuitCode};
pub use packet::{MessageId, Packet, PacketError, PacketHeader};
pub use sequence::{SequenceCounter, MAX_SEQUENCE};
