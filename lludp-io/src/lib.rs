//! LLUDP I/O and Platform Abstraction
//!
//! This crate provides network I/O and platform-specific abstractions,
//! including the UDP socket wrapper, the datagram sink seam used by the
//! outbound transport, clocks, and per-connection tick timers.

pub mod socket;
pub mod time;

pub use socket::{CaptureSink, DatagramSink, LludpSocket, SocketError};
pub use time::{Clock, ManualClock, SystemClock, TickTimer};
