//! UDP socket wrapper for LLUDP
//!
//! Provides the server's UDP socket and the [`DatagramSink`] seam the
//! outbound transport writes through.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Destination for encoded datagrams.
///
/// Implemented by [`LludpSocket`] for real traffic and by [`CaptureSink`]
/// when the transport is driven without a network.
pub trait DatagramSink: Send + Sync {
    /// Send one datagram to `target`, returning the number of bytes written
    fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError>;
}

/// LLUDP socket wrapper
///
/// Wraps a UDP socket configured through `socket2`. Receives block for at
/// most the configured read timeout so the receive loop can observe shutdown.
pub struct LludpSocket {
    inner: UdpSocket,
}

impl LludpSocket {
    /// Create a new socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;

        Ok(LludpSocket {
            inner: socket.into(),
        })
    }

    /// Set the receive timeout used by [`recv_from`](Self::recv_from)
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<(), SocketError> {
        self.inner.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Set the kernel receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        socket2::SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    /// Get the kernel receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(socket2::SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Send data to the given address
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive one datagram
    ///
    /// Returns `Ok(None)` when the read timeout elapsed without traffic.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }
}

impl DatagramSink for LludpSocket {
    fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        self.send_to(buf, target)
    }
}

/// In-memory sink that records every datagram handed to it
#[derive(Default)]
pub struct CaptureSink {
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything captured so far
    pub fn take(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Number of datagrams captured and not yet taken
    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl DatagramSink for CaptureSink {
    fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        self.sent.lock().push((buf.to_vec(), target));
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_creation() {
        let socket = LludpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[test]
    fn test_socket_buffer_size() {
        let socket = LludpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        socket.set_recv_buffer_size(262144).unwrap();

        // May not match exactly due to OS limits
        assert!(socket.recv_buffer_size().unwrap() > 0);
    }

    #[test]
    fn test_socket_send_recv() {
        let sender = LludpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let receiver = LludpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        receiver
            .set_read_timeout(Duration::from_millis(50))
            .unwrap();

        let receiver_addr = receiver.local_addr().unwrap();
        let data = b"Hello, LLUDP!";
        sender.send_datagram(data, receiver_addr).unwrap();

        let mut buf = [0u8; 1024];
        for _ in 0..20 {
            if let Some((n, addr)) = receiver.recv_from(&mut buf).unwrap() {
                assert_eq!(&buf[..n], data);
                assert_eq!(addr, sender.local_addr().unwrap());
                return;
            }
        }
        panic!("Failed to receive data");
    }

    #[test]
    fn test_recv_timeout_returns_none() {
        let socket = LludpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        socket.set_read_timeout(Duration::from_millis(10)).unwrap();

        let mut buf = [0u8; 64];
        assert!(socket.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_capture_sink() {
        let sink = CaptureSink::new();
        let target: SocketAddr = "10.0.0.1:13000".parse().unwrap();

        sink.send_datagram(&[1, 2, 3], target).unwrap();
        sink.send_datagram(&[4], target).unwrap();
        assert_eq!(sink.len(), 2);

        let sent = sink.take();
        assert_eq!(sent[0], (vec![1, 2, 3], target));
        assert!(sink.is_empty());
    }
}
