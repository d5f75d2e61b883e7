//! Single-threaded readiness runtime.
//!
//! - `ByteCursor`: per-connection consume-from-front byte buffer
//! - `ConnectionRegistry`: slab of live connections
//! - `Handler` / `Peer`: event interface between the loop and a protocol
//! - `Multiplexer`: the mio event loop itself

mod buffer;
mod connection;
mod event_loop;
mod handler;

pub use buffer::ByteCursor;
pub use event_loop::{Multiplexer, ShutdownHandle};
pub use handler::{ConnectionId, Handler, Peer};

use crate::config::{Config, ProtocolType};
use crate::protocols::{EchoService, FileTransferService};
use crate::storage::DataRoot;
use std::error::Error;
use tracing::{info, warn};

/// Run the server for the configured protocol until interrupted or
/// terminated.
pub fn run(config: Config) -> Result<(), Box<dyn Error>> {
    match config.protocol {
        ProtocolType::Transfer => {
            let root = DataRoot::open(&config.data_root)?;
            info!(root = %root.path().display(), "Serving files");
            serve(&config, FileTransferService::new(root, config.chunk_size))
        }
        ProtocolType::Echo => serve(&config, EchoService),
    }
}

fn serve<H: Handler>(config: &Config, handler: H) -> Result<(), Box<dyn Error>> {
    let mut mux = Multiplexer::bind(config, handler)?;

    let shutdown = mux.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Interrupted or terminated, closing server");
        if let Err(e) = shutdown.shutdown() {
            warn!(error = %e, "Failed to wake event loop");
        }
    })?;

    mux.run()?;
    info!("Server stopped");
    Ok(())
}
