//! Connection Directory
//!
//! Maps agents and remote addresses to their [`Connection`] and holds the
//! circuit codes of sessions that were authorised but have not sent their
//! first packet yet.
//!
//! All maps sit behind one `RwLock`. No connection lock is ever taken while
//! that lock is held for writing: operations pull the `Arc<Connection>`
//! handles out, release the directory, then act on the connections.

use lludp_io::Clock;
use lludp_protocol::{AgentId, Connection, ConnectionSettings};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Directory errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Circuit code {0} is already pending")]
    DuplicateCode(u32),

    #[error("No pending session for circuit code {0}")]
    HandshakeNotFound(u32),
}

#[derive(Default)]
struct Maps {
    pending: HashMap<u32, AgentId>,
    by_agent: HashMap<AgentId, Arc<Connection>>,
    by_addr: HashMap<SocketAddr, Arc<Connection>>,
}

impl Maps {
    /// Unlink a connection from both maps
    fn unlink(&mut self, conn: &Arc<Connection>) {
        if let Some(current) = self.by_agent.get(&conn.agent_id()) {
            if Arc::ptr_eq(current, conn) {
                self.by_agent.remove(&conn.agent_id());
            }
        }
        if let Some(current) = self.by_addr.get(&conn.remote_addr()) {
            if Arc::ptr_eq(current, conn) {
                self.by_addr.remove(&conn.remote_addr());
            }
        }
    }
}

/// Registry of live and pending circuits
pub struct ConnectionDirectory {
    maps: RwLock<Maps>,
    settings: ConnectionSettings,
    clock: Arc<dyn Clock>,
}

impl ConnectionDirectory {
    /// Create an empty directory
    pub fn new(settings: ConnectionSettings, clock: Arc<dyn Clock>) -> Self {
        ConnectionDirectory {
            maps: RwLock::new(Maps::default()),
            settings,
            clock,
        }
    }

    /// Authorise a session to open a circuit with `code`
    pub fn register_pending(&self, code: u32, agent: AgentId) -> Result<(), DirectoryError> {
        let mut maps = self.maps.write();
        if maps.pending.contains_key(&code) {
            return Err(DirectoryError::DuplicateCode(code));
        }
        maps.pending.insert(code, agent);
        drop(maps);

        debug!(code, agent = %agent, "Registered pending circuit");
        Ok(())
    }

    /// Whether `code` is waiting for its first packet
    pub fn is_pending(&self, code: u32) -> bool {
        self.maps.read().pending.contains_key(&code)
    }

    /// Bind a pending circuit to the address its first packet came from
    ///
    /// Consumes the pending entry. Any connection already registered for the
    /// same agent, or bound to the same address, is torn down first.
    pub fn complete_handshake(
        &self,
        code: u32,
        addr: SocketAddr,
    ) -> Result<Arc<Connection>, DirectoryError> {
        let agent = self
            .maps
            .write()
            .pending
            .remove(&code)
            .ok_or(DirectoryError::HandshakeNotFound(code))?;

        let conn = Arc::new(Connection::new(
            agent,
            addr,
            code,
            self.settings,
            self.clock.now(),
        ));
        // Fresh connection, activation cannot fail
        let _ = conn.activate();

        let mut replaced = Vec::new();
        {
            let mut maps = self.maps.write();
            if let Some(old) = maps.by_agent.get(&agent).cloned() {
                maps.unlink(&old);
                replaced.push(old);
            }
            if let Some(old) = maps.by_addr.get(&addr).cloned() {
                maps.unlink(&old);
                if !replaced.iter().any(|r| Arc::ptr_eq(r, &old)) {
                    replaced.push(old);
                }
            }
            maps.by_agent.insert(agent, conn.clone());
            maps.by_addr.insert(addr, conn.clone());
        }

        for old in replaced {
            warn!(
                agent = %old.agent_id(),
                addr = %old.remote_addr(),
                code = old.circuit_code(),
                "Replacing existing circuit"
            );
            Self::teardown(&old);
        }

        info!(code, agent = %agent, addr = %addr, "Activated circuit");
        Ok(conn)
    }

    pub fn lookup_by_identity(&self, agent: AgentId) -> Option<Arc<Connection>> {
        self.maps.read().by_agent.get(&agent).cloned()
    }

    pub fn lookup_by_address(&self, addr: SocketAddr) -> Option<Arc<Connection>> {
        self.maps.read().by_addr.get(&addr).cloned()
    }

    /// Remove an agent's connection
    ///
    /// Returns false if the agent had none. The connection's timer is
    /// cancelled before this returns.
    pub fn remove(&self, agent: AgentId) -> bool {
        let conn = {
            let mut maps = self.maps.write();
            match maps.by_agent.get(&agent).cloned() {
                Some(conn) => {
                    maps.unlink(&conn);
                    conn
                }
                None => return false,
            }
        };

        info!(agent = %agent, addr = %conn.remote_addr(), "Removed circuit");
        Self::teardown(&conn);
        true
    }

    /// Remove this particular connection, if it is still registered
    ///
    /// Unlike [`remove`](Self::remove) this leaves alone a newer connection
    /// that has since replaced it under the same agent.
    pub fn remove_connection(&self, conn: &Arc<Connection>) -> bool {
        let registered = {
            let mut maps = self.maps.write();
            let registered = maps
                .by_agent
                .get(&conn.agent_id())
                .map_or(false, |current| Arc::ptr_eq(current, conn));
            if registered {
                maps.unlink(conn);
            }
            registered
        };

        if registered {
            info!(agent = %conn.agent_id(), addr = %conn.remote_addr(), "Removed circuit");
            Self::teardown(conn);
        }
        registered
    }

    /// Remove every connection and forget all pending circuits
    pub fn clear(&self) -> usize {
        let conns: Vec<Arc<Connection>> = {
            let mut maps = self.maps.write();
            maps.pending.clear();
            maps.by_addr.clear();
            maps.by_agent.drain().map(|(_, conn)| conn).collect()
        };

        for conn in &conns {
            Self::teardown(conn);
        }
        conns.len()
    }

    /// Snapshot of all live connections
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.maps.read().by_agent.values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.maps.read().pending.len()
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.maps.read().by_agent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn teardown(conn: &Arc<Connection>) {
        if conn.mark_removed() {
            conn.cancel_timer();
        }
    }
}
