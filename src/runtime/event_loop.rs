//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking reads and hand each chunk to the handler.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread. A handler call runs to completion before
//! the next event is looked at, so per-connection events are delivered in
//! arrival order and handler state needs no locking.

use crate::config::Config;
use crate::runtime::connection::{Connection, ConnectionRegistry};
use crate::runtime::{ConnectionId, Handler, Peer};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::SockRef;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

const EVENTS_CAPACITY: usize = 1024;

/// Upper bound on how long idle connections can outlive their timeout.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Requests an orderly stop of a running [`Multiplexer`] from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the loop to close every connection and return.
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::SeqCst);
        self.waker.wake()
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Owns the listening socket and every accepted connection, and dispatches
/// their events to a [`Handler`].
pub struct Multiplexer<H> {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: ConnectionRegistry,
    handler: H,
    read_buf: Vec<u8>,
    idle_timeout: Option<Duration>,
    shutdown: ShutdownHandle,
}

impl<H: Handler> Multiplexer<H> {
    /// Bind the listening socket. Connections are accepted once [`run`] is
    /// called.
    ///
    /// [`run`]: Multiplexer::run
    pub fn bind(config: &Config, handler: H) -> io::Result<Self> {
        let poll = Poll::new()?;

        let listener = create_listener(config.listen, config.backlog)?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        Ok(Self {
            poll,
            listener,
            local_addr,
            connections: ConnectionRegistry::new(config.max_connections),
            handler,
            read_buf: vec![0u8; config.chunk_size],
            idle_timeout: config.idle_timeout(),
            shutdown: ShutdownHandle {
                requested: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept and serve connections until shutdown is requested.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let timeout = self.idle_timeout.map(|t| t.min(IDLE_SWEEP_INTERVAL));

        info!(addr = %self.local_addr, "Listening");

        while !self.shutdown.is_requested() {
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    WAKER_TOKEN => trace!("Woken"),
                    Token(conn_id) => self.handle_readable(conn_id),
                }
            }

            self.expire_idle();
        }

        info!(
            connections = self.connections.len(),
            "Shutting down, closing connections"
        );
        for conn_id in self.connections.ids() {
            self.disconnect(conn_id);
        }
        let _ = self.poll.registry().deregister(&mut self.listener);

        Ok(())
    }

    /// Force-close a connection and notify the handler.
    pub fn disconnect(&mut self, conn_id: ConnectionId) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            let _ = conn.stream.shutdown(Shutdown::Both);

            debug!(conn_id, peer = %conn.peer, "Connection closed");
            self.handler.on_disconnect(conn_id, conn.peer);
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.register_connection(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn register_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Some(timeout) = self.idle_timeout {
            // Only takes effect while a send has the socket in blocking mode
            if let Err(e) = SockRef::from(&stream).set_write_timeout(Some(timeout)) {
                warn!(peer = %peer, error = %e, "Failed to set write timeout");
            }
        }

        let conn_id = match self.connections.insert(Connection::new(stream, peer)) {
            Ok(id) => id,
            Err(_) => {
                warn!(peer = %peer, "Connection limit reached");
                return;
            }
        };

        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        if let Err(e) =
            self.poll
                .registry()
                .register(&mut conn.stream, Token(conn_id), Interest::READABLE)
        {
            error!(peer = %peer, error = %e, "Failed to register connection");
            self.connections.remove(conn_id);
            return;
        }

        debug!(conn_id, peer = %peer, "Accepted connection");
        self.handler.on_connect(conn_id, peer);
    }

    /// Drain a readable socket, one chunk per data event.
    fn handle_readable(&mut self, conn_id: ConnectionId) {
        loop {
            let Some(conn) = self.connections.get_mut(conn_id) else {
                return;
            };

            let n = match conn.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    trace!(conn_id, "EOF");
                    break;
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(conn_id, error = %e, "Read error");
                    break;
                }
            };

            conn.touch();
            let mut peer = LivePeer {
                id: conn_id,
                addr: conn.peer,
                stream: &conn.stream,
                closing: false,
            };
            self.handler.on_data(&mut peer, &self.read_buf[..n]);
            let closing = peer.closing;

            // A handler may block in a long send
            conn.touch();
            if closing {
                break;
            }
        }

        self.disconnect(conn_id);
    }

    fn expire_idle(&mut self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };

        for conn_id in self.connections.idle(Instant::now(), timeout) {
            info!(conn_id, timeout_secs = timeout.as_secs(), "Closing idle connection");
            self.disconnect(conn_id);
        }
    }
}

/// The connection a data event arrived on, as seen by the handler.
struct LivePeer<'a> {
    id: ConnectionId,
    addr: SocketAddr,
    stream: &'a TcpStream,
    closing: bool,
}

impl Peer for LivePeer<'_> {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        send_all(self.stream, data)
    }

    fn disconnect(&mut self) {
        self.closing = true;
    }
}

/// Write every byte of `data`, blocking on the otherwise non-blocking socket
/// until the kernel has accepted all of it.
fn send_all(stream: &TcpStream, data: &[u8]) -> io::Result<()> {
    let socket = SockRef::from(stream);
    socket.set_nonblocking(false)?;

    let mut writer = stream;
    let result = writer.write_all(data);

    let restored = socket.set_nonblocking(true);
    result.and(restored)
}

/// Create the listening socket with the configured backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
