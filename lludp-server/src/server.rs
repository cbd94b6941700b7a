//! Server facade
//!
//! Binds the UDP socket, wires the directory, dispatcher, inbound pipeline
//! and outbound transport together and runs the receive and worker threads.
//! This is the surface application code uses.

use crate::config::{ConfigError, TransportConfig};
use crate::directory::{ConnectionDirectory, DirectoryError};
use crate::dispatcher::Dispatcher;
use crate::inbound::InboundPipeline;
use crate::outbound::{OutboundTransport, SendError};
use lludp_io::{Clock, DatagramSink, LludpSocket, SocketError, SystemClock};
use lludp_protocol::{
    AgentId, CompletePingCheck, ConnectionStats, MessageId, Packet, PacketCategory, PacketError,
    StartPingCheck,
};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Agent {0} is not connected")]
    NotConnected(AgentId),

    #[error("Failed to encode packet: {0}")]
    Encode(#[from] PacketError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Failed to spawn thread: {0}")]
    Thread(#[from] io::Error),
}

impl From<SendError> for ServerError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::NotConnected(agent) => ServerError::NotConnected(agent),
            SendError::Encode(e) => ServerError::Encode(e),
        }
    }
}

/// LLUDP server
pub struct Server {
    local_addr: SocketAddr,
    directory: Arc<ConnectionDirectory>,
    outbound: Arc<OutboundTransport>,
    dispatcher: Arc<Dispatcher>,
    pipeline: Arc<InboundPipeline>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_code: AtomicU32,
}

impl Server {
    /// Bind the socket and start the transport threads
    pub fn bind(config: TransportConfig) -> Result<Self, ServerError> {
        Self::bind_with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`bind`](Self::bind) with a caller-supplied clock
    pub fn bind_with_clock(
        config: TransportConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let socket = LludpSocket::bind(config.bind_addr)?;
        socket.set_read_timeout(config.recv_timeout)?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let directory = Arc::new(ConnectionDirectory::new(
            config.connection_settings(),
            clock.clone(),
        ));
        let sink: Arc<dyn DatagramSink> = socket.clone();
        let outbound = Arc::new(OutboundTransport::new(
            directory.clone(),
            sink,
            clock.clone(),
            config.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new());
        let pipeline = Arc::new(InboundPipeline::new(
            directory.clone(),
            outbound.clone(),
            dispatcher.clone(),
            clock,
            config,
        ));

        let server = Server {
            local_addr,
            directory,
            outbound,
            dispatcher,
            pipeline,
            running: Arc::new(AtomicBool::new(true)),
            threads: Mutex::new(Vec::new()),
            next_code: AtomicU32::new(0),
        };
        server.register_builtin_callbacks();
        server.spawn_threads(socket)?;

        info!(addr = %local_addr, "LLUDP server listening");
        Ok(server)
    }

    fn register_builtin_callbacks(&self) {
        let outbound = self.outbound.clone();
        self.dispatcher
            .register(MessageId::START_PING_CHECK, move |packet, agent| {
                let ping = StartPingCheck::from_packet(packet)?;
                let reply = CompletePingCheck {
                    ping_id: ping.ping_id,
                };
                outbound.send(agent, reply.to_packet(), PacketCategory::Overhead)?;
                Ok(())
            });

        let directory = self.directory.clone();
        self.dispatcher
            .register(MessageId::CLOSE_CIRCUIT, move |_, agent| {
                debug!(agent = %agent, "CloseCircuit received");
                directory.remove(agent);
                Ok(())
            });
    }

    fn spawn_threads(&self, socket: Arc<LludpSocket>) -> Result<(), ServerError> {
        let mut threads = self.threads.lock();

        let pipeline = self.pipeline.clone();
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("lludp-recv".into())
            .spawn(move || pipeline.run_receive_loop(&socket, &running));
        match spawned {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        }

        let pipeline = self.pipeline.clone();
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("lludp-worker".into())
            .spawn(move || pipeline.run_worker_loop(&running));
        match spawned {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Add a callback for every inbound packet of `message_id`
    ///
    /// Callbacks run on the worker thread in registration order.
    pub fn register_packet_callback<F>(&self, message_id: MessageId, callback: F)
    where
        F: Fn(&Packet, AgentId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.register(message_id, callback);
    }

    /// Send a packet to a connected agent
    pub fn send_packet(
        &self,
        agent: AgentId,
        packet: Packet,
        category: PacketCategory,
    ) -> Result<(), ServerError> {
        self.outbound.send(agent, packet, category)?;
        Ok(())
    }

    /// Send a packet to every connected agent
    pub fn broadcast_packet(&self, packet: &Packet, category: PacketCategory) -> usize {
        self.outbound.broadcast(packet, category)
    }

    /// Authorise `agent` to open a circuit and return its circuit code
    pub fn create_pending_session(&self, agent: AgentId) -> u32 {
        loop {
            let code = self.next_code.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if code == 0 {
                continue;
            }
            match self.directory.register_pending(code, agent) {
                Ok(()) => {
                    info!(agent = %agent, code, "Created circuit");
                    return code;
                }
                Err(DirectoryError::DuplicateCode(_)) => continue,
                Err(e) => {
                    warn!(agent = %agent, code, "Failed to register circuit: {}", e);
                    continue;
                }
            }
        }
    }

    /// Authorise `agent` under a circuit code issued elsewhere (e.g. by login)
    pub fn register_circuit(&self, code: u32, agent: AgentId) -> Result<(), ServerError> {
        self.directory.register_pending(code, agent)?;
        Ok(())
    }

    /// Tear down an agent's circuit
    pub fn remove_session(&self, agent: AgentId) -> bool {
        self.directory.remove(agent)
    }

    pub fn connection_stats(&self, agent: AgentId) -> Option<ConnectionStats> {
        self.directory
            .lookup_by_identity(agent)
            .map(|conn| conn.stats())
    }

    /// Agents with a live circuit
    pub fn connected_agents(&self) -> Vec<AgentId> {
        self.directory
            .connections()
            .iter()
            .map(|conn| conn.agent_id())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.directory.len()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.directory
    }

    pub fn outbound(&self) -> &Arc<OutboundTransport> {
        &self.outbound
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the transport threads and remove every connection
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                warn!("Transport thread panicked");
            }
        }

        let removed = self.directory.clear();
        info!(addr = %self.local_addr, connections = removed, "LLUDP server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
