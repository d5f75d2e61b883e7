//! Registry of live connections.
//!
//! Each connection is stored in a slab; its slab key is the
//! [`ConnectionId`] handed to handlers and used as the mio token.

use crate::runtime::ConnectionId;
use mio::net::TcpStream;
use slab::Slab;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    /// Non-blocking socket registered with the poller.
    pub stream: TcpStream,
    /// Peer address, captured at accept time.
    pub peer: SocketAddr,
    /// Time of the last successful read.
    pub last_active: Instant,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            last_active: Instant::now(),
        }
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Whether the connection has been idle for at least `timeout` at `now`.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_active) >= timeout
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Result<ConnectionId, Connection> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Identifiers of every active connection.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|(id, _)| id).collect()
    }

    /// Identifiers of connections idle for at least `timeout`.
    pub fn idle(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.is_idle(now, timeout))
            .map(|(id, _)| id)
            .collect()
    }
}
