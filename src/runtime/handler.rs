//! Connection event interface.
//!
//! The event loop owns sockets; a [`Handler`] owns protocol state. The loop
//! calls the handler for connect, data and disconnect, and hands it a
//! [`Peer`] through which it can write back or close the connection.

use std::io;
use std::net::SocketAddr;

/// Stable identifier of a connection for its lifetime.
///
/// Identifiers are reused after a connection closes, so handlers must drop
/// per-connection state in [`Handler::on_disconnect`].
pub type ConnectionId = usize;

/// The connection a data event arrived on.
pub trait Peer {
    fn id(&self) -> ConnectionId;

    fn addr(&self) -> SocketAddr;

    /// Write all of `data`, blocking until it has been handed to the kernel.
    ///
    /// Never returns having sent only a prefix: either every byte was
    /// written or an error is returned.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Ask the event loop to close this connection once the handler returns.
    fn disconnect(&mut self);
}

/// Receives connection events from the event loop.
///
/// Calls for one connection arrive strictly in socket order and never
/// overlap.
pub trait Handler {
    fn on_connect(&mut self, _id: ConnectionId, _addr: SocketAddr) {}

    /// Up to one read chunk of bytes arrived.
    fn on_data(&mut self, peer: &mut dyn Peer, data: &[u8]);

    /// The connection is gone, whoever closed it.
    fn on_disconnect(&mut self, _id: ConnectionId, _addr: SocketAddr) {}
}
