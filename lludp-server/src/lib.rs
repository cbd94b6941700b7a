//! LLUDP Server Transport
//!
//! The reliable transport and packet dispatch engine of a simulator: the
//! connection directory, the inbound receive and worker loops, the outbound
//! send/ack/resend logic, the callback registry and the [`Server`] facade
//! application code talks to.

pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod inbound;
pub mod outbound;
pub mod server;

pub use config::{ConfigError, TransportConfig};
pub use directory::{ConnectionDirectory, DirectoryError};
pub use dispatcher::{Dispatcher, PacketCallback};
pub use inbound::{InboundPipeline, IncomingPacket};
pub use outbound::{OutboundTransport, SendError};
pub use server::{Server, ServerError};
