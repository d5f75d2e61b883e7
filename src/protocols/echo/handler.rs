//! Echo protocol handler.

use crate::runtime::{ConnectionId, Handler, Peer};
use std::net::SocketAddr;
use tracing::{debug, info};

const PREFIX: &[u8] = b"Echoing ";

/// Stateless echo handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoService;

impl Handler for EchoService {
    fn on_connect(&mut self, id: ConnectionId, addr: SocketAddr) {
        info!(conn_id = id, peer = %addr, "Connected");
    }

    fn on_data(&mut self, peer: &mut dyn Peer, data: &[u8]) {
        debug!(conn_id = peer.id(), len = data.len(), data = %String::from_utf8_lossy(data), "Echoing");

        let mut reply = Vec::with_capacity(PREFIX.len() + data.len());
        reply.extend_from_slice(PREFIX);
        reply.extend_from_slice(data);

        if let Err(e) = peer.send(&reply) {
            debug!(conn_id = peer.id(), error = %e, "Echo failed");
            peer.disconnect();
        }
    }

    fn on_disconnect(&mut self, id: ConnectionId, addr: SocketAddr) {
        info!(conn_id = id, peer = %addr, "Disconnected");
    }
}
