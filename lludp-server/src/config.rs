//! Transport configuration

use lludp_protocol::{ConnectionSettings, MAX_SEQUENCE};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("max_appended_acks ({0}) exceeds the wire limit of 255")]
    TooManyAppendedAcks(usize),

    #[error("max_pending_acks ({0}) exceeds what one PacketAck can carry (255)")]
    TooManyPendingAcks(usize),
}

/// Transport tuning knobs
///
/// The defaults are the values simulators and viewers have used in the
/// field for years; changing them mostly matters for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Local UDP address to bind
    pub bind_addr: SocketAddr,
    /// Capacity of the queue between the receive and worker loops
    pub inbox_capacity: usize,
    /// Inbound sequence numbers remembered per connection for duplicate detection
    pub archive_capacity: usize,
    /// Pending acks that trigger an immediate standalone flush
    pub ack_threshold: usize,
    /// Most acks piggybacked on one outgoing packet
    pub max_appended_acks: usize,
    /// Above this many pending acks the flush is skipped and an error logged
    pub max_pending_acks: usize,
    /// Time a reliable packet may go unacknowledged before it is resent
    pub resend_timeout: Duration,
    /// Resends before a reliable packet is dropped
    pub max_resends: u32,
    /// Inactivity after which a connection dropping packets is torn down
    pub idle_timeout: Duration,
    /// Period of each connection's ack flush and resend scan
    pub tick_interval: Duration,
    /// Highest outbound sequence number before the counter resets
    pub sequence_ceiling: u32,
    /// Receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Read timeout of the receive loop, bounds how long shutdown takes
    pub recv_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            inbox_capacity: 100,
            archive_capacity: 200,
            ack_threshold: 10,
            max_appended_acks: 9,
            max_pending_acks: 250,
            resend_timeout: Duration::from_millis(4000),
            max_resends: 3,
            idle_timeout: Duration::from_millis(60_000),
            tick_interval: Duration::from_millis(500),
            sequence_ceiling: MAX_SEQUENCE,
            recv_buffer_size: 4096,
            recv_timeout: Duration::from_millis(100),
        }
    }
}

impl TransportConfig {
    /// Configuration bound to an explicit address, other fields defaulted
    pub fn with_bind_addr(bind_addr: SocketAddr) -> Self {
        TransportConfig {
            bind_addr,
            ..Default::default()
        }
    }

    /// Check the configuration for values the transport cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("inbox_capacity", self.inbox_capacity),
            ("archive_capacity", self.archive_capacity),
            ("ack_threshold", self.ack_threshold),
            ("max_pending_acks", self.max_pending_acks),
            ("recv_buffer_size", self.recv_buffer_size),
            ("sequence_ceiling", self.sequence_ceiling as usize),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        let durations = [
            ("resend_timeout", self.resend_timeout),
            ("idle_timeout", self.idle_timeout),
            ("tick_interval", self.tick_interval),
            ("recv_timeout", self.recv_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.max_appended_acks > lludp_protocol::packet::MAX_APPENDED_ACKS {
            return Err(ConfigError::TooManyAppendedAcks(self.max_appended_acks));
        }
        if self.max_pending_acks > lludp_protocol::PacketAck::MAX_IDS {
            return Err(ConfigError::TooManyPendingAcks(self.max_pending_acks));
        }

        Ok(())
    }

    /// Settings for connections created under this configuration
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            sequence_ceiling: self.sequence_ceiling,
            archive_capacity: self.archive_capacity,
        }
    }
}
