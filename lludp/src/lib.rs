//! LLUDP - reliable UDP transport for virtual-world simulators
//!
//! High-level Rust API for the legacy viewer/simulator UDP protocol.

pub use lludp_io as io;
pub use lludp_protocol as protocol;
pub use lludp_server as server;

// Re-export commonly used types
pub use protocol::{AgentId, MessageId, Packet, PacketCategory};
pub use server::{Server, ServerError, TransportConfig};
